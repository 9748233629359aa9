//! Error types for the detection engine and webhook pipeline.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::AlertStatus;

/// High-level error categorization used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Temporary failure, worth another attempt
    Transient,
    /// Will fail the same way on every attempt
    Permanent,
    /// Missing or inconsistent configuration
    Configuration,
}

/// Errors raised while evaluating events and managing alerts.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An external lookup (commits, pull requests, comments, sprints) failed
    #[error("{service} lookup failed: {message}")]
    Lookup {
        /// Lookup service name
        service: &'static str,
        /// Failure detail
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that timed out
        operation: String,
    },

    /// The alert store rejected or failed an operation
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A requested status change is not allowed from the current status
    #[error("cannot move alert {id} from {from} to {to}")]
    InvalidTransition {
        /// Alert ID
        id: String,
        /// Current status
        from: AlertStatus,
        /// Requested status
        to: AlertStatus,
    },

    /// No alert with the given ID exists
    #[error("alert not found: {0}")]
    AlertNotFound(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue operation failed
    #[error("queue error: {0}")]
    Queue(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Create a lookup error for the given service.
    pub fn lookup(service: &'static str, message: impl Into<String>) -> Self {
        Self::Lookup {
            service,
            message: message.into(),
        }
    }

    /// Create a timeout error for the given operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if the error is transient and the event should be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Get the error category for monitoring and retry decisions.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Lookup { .. } | Self::Timeout { .. } | Self::Persistence(_) | Self::Queue(_) => {
                ErrorCategory::Transient
            }
            Self::InvalidTransition { .. } | Self::AlertNotFound(_) | Self::Serialization(_) => {
                ErrorCategory::Permanent
            }
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }
}

/// Errors surfaced at the webhook boundary.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Missing or invalid signature
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Body or headers could not be turned into an event
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Queue or idempotency store failure
    #[error("internal error: {0}")]
    Internal(#[from] EngineError),
}

impl IntakeError {
    /// HTTP status the webhook caller should receive.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_errors_are_transient() {
        let err = EngineError::lookup("commits", "connection reset");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "commits lookup failed: connection reset");
    }

    #[test]
    fn test_invalid_transition_is_permanent() {
        let err = EngineError::InvalidTransition {
            id: "a1".to_string(),
            from: AlertStatus::Resolved,
            to: AlertStatus::Active,
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert_eq!(err.to_string(), "cannot move alert a1 from resolved to active");
    }

    #[test]
    fn test_intake_status_codes() {
        assert_eq!(
            IntakeError::Authentication("bad signature".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            IntakeError::MalformedPayload("not json".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            IntakeError::Internal(EngineError::Queue("closed".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
