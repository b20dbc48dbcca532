//! Error types for the auth kernel

use std::io;

use thiserror::Error;

use crate::keys::KeyError;

/// Result type alias for the auth kernel
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors (startup, configuration and I/O).
///
/// Per-request authorization failures have their own types in
/// [`crate::auth`] and never surface through this enum.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signing key could not be loaded or generated
    #[error("Signing key error: {0}")]
    Key(#[from] KeyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error must abort process startup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Key(_) | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_and_config_errors_are_fatal() {
        assert!(Error::Config("bad".to_string()).is_fatal());
        assert!(Error::Key(KeyError::WeakKey { bits: 1024 }).is_fatal());
        assert!(!Error::Internal("oops".to_string()).is_fatal());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::Key(KeyError::WeakKey { bits: 512 });
        assert!(err.to_string().contains("512"));
    }
}
