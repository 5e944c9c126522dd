//! Error types for the alarm scheduler.

use crate::calendar::store::StoreError;

/// Top-level error type for ulticlock.
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// An alarm with this ID is already pending or executing.
    #[error("alarm already exists: {0}")]
    DuplicateId(String),

    /// No pending alarm with this ID.
    #[error("alarm not found: {0}")]
    NotFound(String),

    /// Malformed time specification.
    #[error("invalid time spec {0:?}: expected YYYY-MM-DD HH:MM:SS")]
    Parse(String),

    /// Request rejected before touching the queue (bad ID, empty command).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The alarm command ran but did not succeed.
    #[error("alarm {alarm_id} failed: {reason}")]
    Execution {
        /// Alarm whose command failed.
        alarm_id: String,
        /// Exit status, spawn error or timeout description.
        reason: String,
    },

    /// Removing the alarm's helper artifacts failed.
    #[error("cleanup for alarm {alarm_id} failed: {reason}")]
    Cleanup {
        /// Alarm whose artifacts could not be removed.
        alarm_id: String,
        /// Underlying I/O failure.
        reason: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Calendar fetch or parse error.
    #[error("calendar error: {0}")]
    Calendar(String),

    /// Event store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Control API client transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Control API server error.
    #[error("server error: {0}")]
    Server(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AlarmError {
    /// Machine-readable kind reported to control API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateId(_) => "duplicate_id",
            Self::NotFound(_) => "not_found",
            Self::Parse(_) => "parse_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Execution { .. } => "execution_failure",
            Self::Cleanup { .. } => "cleanup_failure",
            Self::Config(_) => "config_error",
            Self::Calendar(_) => "calendar_error",
            Self::Store(_) => "store_error",
            Self::Http(_) => "http_error",
            Self::Server(_) => "server_error",
            Self::Io(_) => "io_error",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AlarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(AlarmError::DuplicateId("a".into()).kind(), "duplicate_id");
        assert_eq!(AlarmError::NotFound("a".into()).kind(), "not_found");
        assert_eq!(AlarmError::Parse("x".into()).kind(), "parse_error");
        assert_eq!(
            AlarmError::InvalidRequest("x".into()).kind(),
            "invalid_request"
        );
    }

    #[test]
    fn parse_error_names_expected_format() {
        let msg = AlarmError::Parse("not-a-date".into()).to_string();
        assert!(msg.contains("not-a-date"));
        assert!(msg.contains("YYYY-MM-DD HH:MM:SS"));
    }
}
