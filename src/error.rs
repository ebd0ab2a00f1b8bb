//! Error types for Pin Relay.

use std::time::Duration;

use crate::events::model::StreamKey;

/// Top-level error type for startup and wiring.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Messaging platform errors, split by whether a retry can help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Transient failure in {operation}: {reason}")]
    Transient {
        operation: &'static str,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Permanent failure in {operation}: {reason}")]
    Permanent {
        operation: &'static str,
        reason: String,
    },
}

impl GatewayError {
    pub fn transient(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Permanent {
            operation,
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Inbound payload problems. Always rejected before an actor sees the event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors surfaced to the caller of the inbound endpoint for one event.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Send failed: {0}")]
    Send(GatewayError),

    #[error("Pin failed: {0}")]
    Pin(GatewayError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Actor for stream {0} is unavailable")]
    ActorUnavailable(StreamKey),
}

impl RelayError {
    /// Short machine-readable tag for responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Send(e) | Self::Pin(e) if e.is_transient() => "gateway_transient",
            Self::Send(_) | Self::Pin(_) => "gateway_permanent",
            Self::Persistence(_) => "persistence",
            Self::ActorUnavailable(_) => "actor_unavailable",
        }
    }
}

/// Result type alias for startup code.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_error_kind_distinguishes_gateway_classes() {
        let transient = RelayError::Send(GatewayError::transient("send", "502"));
        let permanent = RelayError::Pin(GatewayError::permanent("pin", "403"));
        assert_eq!(transient.kind(), "gateway_transient");
        assert_eq!(permanent.kind(), "gateway_permanent");
    }

    #[test]
    fn validation_converts_into_relay_error() {
        let err: RelayError = ValidationError::MissingField("action").into();
        assert_eq!(err.kind(), "validation");
        assert_eq!(
            err.to_string(),
            "Validation failed: Missing required field: action"
        );
    }
}
