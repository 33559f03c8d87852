use log::{debug, warn};
use rand::seq::SliceRandom;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::errors::AdapterFailure;

/// GET with retries, exponential backoff and a rotating User-Agent.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agents: Arc<Vec<String>>,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            user_agents: Arc::new(config.user_agents.clone()),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or("Mozilla/5.0")
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, AdapterFailure> {
        let mut last_error = None;

        for attempt in 0..=self.retry_attempts {
            debug!("GET {} (attempt {})", url, attempt + 1);
            match self
                .client
                .get(url)
                .header(USER_AGENT, self.pick_user_agent())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.map_err(|e| AdapterFailure::network(url, e));
                }
                Ok(response) => {
                    last_error = Some(AdapterFailure::Network(format!("{} - HTTP {}", url, response.status())));
                }
                Err(e) if e.is_timeout() => last_error = Some(AdapterFailure::Timeout),
                Err(e) => last_error = Some(AdapterFailure::network(url, e)),
            }

            if attempt < self.retry_attempts {
                let delay = backoff_delay(self.retry_delay, attempt);
                warn!("Request to {} failed, retrying in {:?}", url, delay);
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| AdapterFailure::Network(format!("{} - unknown fetch error", url))))
    }
}

/// Exponential backoff, saturating instead of overflowing on large attempts.
fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    let factor = u32::try_from(attempt)
        .ok()
        .and_then(|attempt| 2_u32.checked_pow(attempt))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}
