//! Hands selected urls to the external downloader (yt-dlp by default).

use axum::extract::State;
use axum::response::Json;
use log::{error, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::rest::ApiError;
use super::AppState;

const MISSING_COOKIES: &str = "The required cookies file is not being used or does not exist. \
Please provide a valid path.\n\nInstructions for Exporting Cookies:\n\
1. For Chrome: Use the EditThisCookie extension to export cookies.\n\
2. For Firefox: Use the Cookies.txt extension to export cookies.\n\
3. For Edge: Use the EditThisCookie extension or sync with Chrome to export cookies.";

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    pub cookiefile: Option<PathBuf>,
    pub location: Option<PathBuf>,
}

/// Arguments for one downloader invocation.
pub fn downloader_args(cookie_file: &Path, location: &Path, url: &str) -> Vec<String> {
    vec![
        "--cookies".to_string(),
        cookie_file.display().to_string(),
        "-o".to_string(),
        location.join("%(title)s.%(ext)s").display().to_string(),
        url.to_string(),
    ]
}

fn validate(request: &DownloadRequest) -> Result<PathBuf, ApiError> {
    let cookie_file = request
        .cookiefile
        .as_ref()
        .filter(|path| path.exists())
        .ok_or_else(|| ApiError::validation(MISSING_COOKIES))?;
    if request.urls.is_empty() {
        return Err(ApiError::validation("urls must not be empty"));
    }
    if let Some(bad) = request
        .urls
        .iter()
        .find(|u| {
            url::Url::parse(u)
                .map(|parsed| !matches!(parsed.scheme(), "http" | "https"))
                .unwrap_or(true)
        })
    {
        return Err(ApiError::validation(format!("not a downloadable url: {}", bad)));
    }
    Ok(cookie_file.clone())
}

/// POST /download_videos
pub async fn download_videos(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<Value>, ApiError> {
    let cookie_file = validate(&request)?;
    let location = request
        .location
        .clone()
        .unwrap_or_else(|| state.config.download_dir());
    let command = state.config.downloader_command.clone();

    info!("Starting {} downloads into {}", request.urls.len(), location.display());
    for url in request.urls {
        let args = downloader_args(&cookie_file, &location, &url);
        let command = command.clone();
        tokio::spawn(async move {
            let status = Command::new(&command)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if status.success() => info!("Downloaded {}", url),
                Ok(status) => error!("Error downloading {}: {} exited with {}", url, command, status),
                Err(e) => error!("Error downloading {}: could not run {}: {}", url, command, e),
            }
        });
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Downloads started.",
    })))
}
