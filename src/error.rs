//! Error types for the pickup engine
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Typed failures are raised as `EngineError` and
//! converted into `anyhow::Error` at the call site.

use crate::types::MatchKey;

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific pickup progression scenarios
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed external input; rejected locally without any state change
    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Participant unavailable: {player_id}")]
    UnavailableParticipant { player_id: String },

    /// The persistence gateway failed mid-transition
    #[error("Persistence failure during {operation}: {message}")]
    Persistence { operation: String, message: String },

    /// In-flight state that cannot be rebuilt after a restart
    #[error("Recovery gap for pending match {key}")]
    RecoveryGap { key: MatchKey },

    #[error("Pending match not found: {key}")]
    MatchNotFound { key: MatchKey },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal engine error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Shorthand for a validation failure
    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a persistence failure
    pub fn persistence(operation: &str, message: impl std::fmt::Display) -> Self {
        EngineError::Persistence {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

/// Check whether an error chain carries a validation failure
pub fn is_validation(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<EngineError>(),
        Some(EngineError::Validation { .. })
    )
}

/// True when the gateway itself failed, as opposed to a bug or bad config
pub fn is_persistence(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<EngineError>(),
        Some(EngineError::Persistence { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_detection() {
        let err: anyhow::Error = EngineError::validation("bad pick").into();
        assert!(is_validation(&err));

        let err: anyhow::Error = EngineError::persistence("set_stage", "disk full").into();
        assert!(!is_validation(&err));
        assert!(is_persistence(&err));
        assert_eq!(
            err.to_string(),
            "Persistence failure during set_stage: disk full"
        );
    }

    #[test]
    fn test_persistence_detection_survives_context() {
        let err: anyhow::Error = EngineError::persistence("clear_match", "timeout").into();
        assert!(is_persistence(&err.context("unwinding guild=1 config=2")));

        let err: anyhow::Error = EngineError::Internal {
            message: "Cannot split 5 participants into 2 equal teams".to_string(),
        }
        .into();
        assert!(!is_persistence(&err));
    }
}
