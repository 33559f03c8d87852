use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::model::SourceType;

const APP_DIR: &str = "vidsearch";
const CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "history.json";
const MAX_RETRY_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    /// Deadline for one adapter page, covering the request and draining its results.
    pub adapter_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub page_size: usize,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
    pub user_agents: Vec<String>,
    pub youtube_api_key: Option<String>,
    /// External scraper program; when set it serves `scraper_sources`.
    pub scraper_command: Option<String>,
    pub scraper_args: Vec<String>,
    pub scraper_sources: BTreeSet<SourceType>,
    pub downloader_command: String,
    pub download_dir: Option<PathBuf>,
    pub session_retention_secs: u64,
    pub channel_buffer: usize,
    pub history_size: usize,
    /// Keep search history on disk between runs.
    pub persist_history: bool,
    /// Defaults to `history.json` in the platform data dir.
    pub history_file: Option<PathBuf>,
    /// Directory local file searches are confined to.
    pub local_search_root: PathBuf,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5001,
            adapter_timeout_secs: 30,
            request_timeout_secs: 15,
            page_size: 25,
            retry_attempts: 2,
            retry_delay_ms: 1000,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15".to_string(),
            ],
            youtube_api_key: None,
            scraper_command: None,
            scraper_args: Vec::new(),
            scraper_sources: SourceType::ALL.into_iter().collect(),
            downloader_command: "yt-dlp".to_string(),
            download_dir: None,
            session_retention_secs: 600,
            channel_buffer: 1024,
            history_size: 100,
            persist_history: true,
            history_file: None,
            local_search_root: PathBuf::from("."),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path`, or from the platform config dir when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let config = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| ConfigError::file_system(path.clone(), e))?;
            let config: AppConfig = serde_json::from_str(&content).map_err(|e| ConfigError::parse(path.clone(), e))?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            AppConfig::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::file_system(parent.to_path_buf(), e))?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::parse(path.to_path_buf(), e))?;
        fs::write(path, content).map_err(|e| ConfigError::file_system(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !["trace", "debug", "info", "warn", "error"].contains(&self.log_level.as_str()) {
            return Err(ConfigError::validation(
                "log_level",
                "must be one of: trace, debug, info, warn, error",
            ));
        }
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::validation(
                "retry_attempts",
                format!("must be at most {}", MAX_RETRY_ATTEMPTS),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::validation("page_size", "must be greater than zero"));
        }
        if self.adapter_timeout_secs == 0 {
            return Err(ConfigError::validation("adapter_timeout_secs", "must be greater than zero"));
        }
        if self.user_agents.is_empty() {
            return Err(ConfigError::validation("user_agents", "at least one user agent is required"));
        }
        if self.scraper_command.is_some() && self.scraper_sources.is_empty() {
            return Err(ConfigError::validation(
                "scraper_sources",
                "a scraper command needs at least one source type",
            ));
        }
        Ok(())
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Where search history is persisted, or `None` to keep it in memory.
    pub fn history_path(&self) -> Option<PathBuf> {
        if !self.persist_history {
            return None;
        }
        self.history_file
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR).join(HISTORY_FILE)))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": 8080, "scraper_sources": ["video"]}"#).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.scraper_sources, [SourceType::Video].into_iter().collect());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            youtube_api_key: Some("key".to_string()),
            log_level: "debug".to_string(),
            ..AppConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"log_level": "loud"}"#).unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Validation { .. })
        ));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn retry_attempts_are_bounded() {
        let mut config = AppConfig {
            retry_attempts: MAX_RETRY_ATTEMPTS,
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());

        config.retry_attempts = 40;
        match config.validate() {
            Err(ConfigError::Validation { field, .. }) => assert_eq!(field, "retry_attempts"),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn history_path_follows_persistence_settings() {
        let mut config = AppConfig {
            history_file: Some(PathBuf::from("/tmp/vidsearch-history.json")),
            ..AppConfig::default()
        };
        assert_eq!(config.history_path(), Some(PathBuf::from("/tmp/vidsearch-history.json")));

        config.persist_history = false;
        assert_eq!(config.history_path(), None);
    }
}
