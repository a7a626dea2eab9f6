//! Error types for the synchronization engine.
//!
//! Domain-level failures (`SourceUnavailable`, `DataCorruption`) are collected by the
//! orchestrator and reported once at the end of a run. Everything else aborts the
//! operation that raised it.

use std::path::PathBuf;
use thiserror::Error;

use crate::download::Payload;
use crate::schema::Domain;

pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Configuration,
    SourceUnavailable,
    DataCorruption,
    AlreadyRunning,
    CleanFailure,
    Database,
    Io,
    Internal,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::DataCorruption => "DATA_CORRUPTION",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::CleanFailure => "CLEAN_FAILURE",
            Self::Database => "DATABASE_ERROR",
            Self::Io => "IO_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Category-based process exit code.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Internal => 1,
            Self::Configuration => 2,
            Self::SourceUnavailable => 3,
            Self::DataCorruption => 4,
            Self::AlreadyRunning => 5,
            Self::CleanFailure => 6,
            Self::Database => 7,
            Self::Io => 8,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{payload} unavailable from every source: {}", attempts.join("; "))]
    SourceUnavailable {
        payload: Payload,
        attempts: Vec<String>,
    },

    #[error("Corrupt data for {domain}: {reason}")]
    DataCorruption { domain: Domain, reason: String },

    #[error("Another synchronization is already running (lock file {lock:?})")]
    AlreadyRunning { lock: PathBuf },

    #[error("Clean rebuild failed: {0}")]
    CleanFailure(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::Configuration,
            Self::SourceUnavailable { .. } | Self::Http(_) => ErrorCode::SourceUnavailable,
            Self::DataCorruption { .. } => ErrorCode::DataCorruption,
            Self::AlreadyRunning { .. } => ErrorCode::AlreadyRunning,
            Self::CleanFailure(_) => ErrorCode::CleanFailure,
            Self::Database(_) => ErrorCode::Database,
            Self::Io(_) | Self::Csv(_) => ErrorCode::Io,
            Self::Json(_) => ErrorCode::Configuration,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.code().exit_code()
    }

    /// Recovery hint shown after the error message, if one applies.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::AlreadyRunning { lock } => Some(format!(
                "If no other sync is running, remove {} and retry",
                lock.display()
            )),
            Self::CleanFailure(_) => {
                Some("The database must be rebuilt: rerun with `-O clean`".to_string())
            }
            Self::SourceUnavailable { .. } => {
                Some("Try again later or pass `-O fallback`".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_errors_are_io() {
        let err = Error::from(csv::Error::from(std::io::Error::other("disk full")));
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(err.exit_code(), 8);
    }

    #[test]
    fn test_source_unavailable_message_lists_attempts() {
        let err = Error::SourceUnavailable {
            payload: Payload::Ships,
            attempts: vec!["primary: timeout".into(), "fallback: 503".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("index.json"));
        assert!(msg.contains("primary: timeout; fallback: 503"));
        assert_eq!(err.exit_code(), 3);
    }
}
