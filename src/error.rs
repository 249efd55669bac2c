//! Error types for the Turnstile service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// Metrics registration or encoding errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_store_error_converts() {
        let err: TurnstileError = StoreError::Timeout(Duration::from_millis(250)).into();

        assert!(matches!(err, TurnstileError::Store(StoreError::Timeout(_))));
        assert_eq!(
            err.to_string(),
            "Counter store error: store did not answer within 250ms"
        );
    }
}
