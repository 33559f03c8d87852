use std::path::PathBuf;
use thiserror::Error;

use crate::model::{SessionId, SourceType};

/// Failure of one source adapter. Never escapes the coordinator; it is
/// recorded as that source's `AdapterState::Failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterFailure {
    #[error("Timeout")]
    Timeout,

    #[error("MalformedResponse: {0}")]
    MalformedResponse(String),

    #[error("Network: {0}")]
    Network(String),

    #[error("Process: {0}")]
    Process(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AdapterFailure {
    pub fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network(format!("{} - {}", url, source))
    }

    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::MalformedResponse(detail.to_string())
    }

    pub fn process(command: &str, detail: impl std::fmt::Display) -> Self {
        Self::Process(format!("{}: {}", command, detail))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    #[error("Source {source_type} was not selected for session {session_id}")]
    SourceNotSelected {
        session_id: SessionId,
        source_type: SourceType,
    },

    #[error("Source {source_type} has no further pages")]
    SourceExhausted { source_type: SourceType },

    #[error("Source {source_type} is still fetching")]
    SessionBusy { source_type: SourceType },

    #[error("Session {session_id} is closed")]
    SessionClosed { session_id: SessionId },

    #[error("Source {source_type} failed: {failure}")]
    Adapter {
        source_type: SourceType,
        failure: AdapterFailure,
    },
}

impl SearchError {
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocalSearchError {
    #[error("Directory {path} is outside the search root")]
    OutsideRoot { path: PathBuf },

    #[error("Directory not found: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Local search failed: {0}")]
    Walk(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file operation failed: {path} - {message}")]
    FileSystem { path: PathBuf, message: String },

    #[error("Invalid config file: {path} - {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config value: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

impl ConfigError {
    pub fn file_system(path: PathBuf, source: std::io::Error) -> Self {
        Self::FileSystem {
            path,
            message: source.to_string(),
        }
    }

    pub fn parse(path: PathBuf, source: serde_json::Error) -> Self {
        Self::Parse {
            path,
            message: source.to_string(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}
