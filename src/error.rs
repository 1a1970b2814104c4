use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while opening or running audio capture.
///
/// Only the microphone source is allowed to fail a recording start; every
/// other variant degrades capture and is reported upstream as a warning.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture did not start within {0:?}")]
    Timeout(Duration),

    #[error("failed to mix capture sources: {0}")]
    MixingFailed(String),

    #[error("no capture source could be opened")]
    NoSources,

    #[error("capture backend error: {0}")]
    Backend(String),

    /// Graceful shutdown exceeded its bound. Triggers forced teardown and
    /// is logged, never surfaced as a caller-fatal error.
    #[error("cleanup timed out; forcing teardown")]
    CleanupTimeout,
}

/// Errors raised while submitting a recording to the processing service.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("processing service unreachable: {0}")]
    Unreachable(String),

    #[error("processing service rejected credentials")]
    Unauthorized,

    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("processing service error: {0}")]
    Server(String),

    #[error("recording has no audio chunks")]
    EmptyPayload,

    #[error("malformed chunk payload: {0}")]
    BadPayload(String),
}

/// Caller-facing classification of a sync failure, persisted on the
/// recording so the host shell can render a retry affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFailureCategory {
    Connectivity,
    Auth,
    Payload,
    Server,
}

impl SyncFailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncFailureCategory::Connectivity => "connectivity",
            SyncFailureCategory::Auth => "auth",
            SyncFailureCategory::Payload => "payload",
            SyncFailureCategory::Server => "server",
        }
    }
}

impl SyncError {
    /// Retryable errors go through the backoff loop; the rest fail the
    /// attempt immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Unreachable(_) | SyncError::Server(_) => true,
            SyncError::Unauthorized
            | SyncError::PayloadTooLarge { .. }
            | SyncError::EmptyPayload
            | SyncError::BadPayload(_) => false,
        }
    }

    pub fn category(&self) -> SyncFailureCategory {
        match self {
            SyncError::Unreachable(_) => SyncFailureCategory::Connectivity,
            SyncError::Unauthorized => SyncFailureCategory::Auth,
            SyncError::PayloadTooLarge { .. }
            | SyncError::EmptyPayload
            | SyncError::BadPayload(_) => SyncFailureCategory::Payload,
            SyncError::Server(_) => SyncFailureCategory::Server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_retryability() {
        assert!(SyncError::Unreachable("connection refused".into()).is_retryable());
        assert!(SyncError::Server("500".into()).is_retryable());
        assert!(!SyncError::Unauthorized.is_retryable());
        assert!(!SyncError::PayloadTooLarge { size: 10, limit: 5 }.is_retryable());
        assert!(!SyncError::EmptyPayload.is_retryable());
    }

    #[test]
    fn test_sync_error_categories() {
        assert_eq!(
            SyncError::Unreachable("x".into()).category(),
            SyncFailureCategory::Connectivity
        );
        assert_eq!(SyncError::Unauthorized.category(), SyncFailureCategory::Auth);
        assert_eq!(
            SyncError::Server("boom".into()).category(),
            SyncFailureCategory::Server
        );
        assert_eq!(SyncError::EmptyPayload.category().as_str(), "payload");
    }
}
