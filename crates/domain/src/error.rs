//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HubError`]
//! via `From`, so use-cases can propagate with `?` regardless of origin.

/// Top-level error for every hearth operation.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("capacity exceeded: {0}")]
    Capacity(#[from] CapacityError),

    #[error("store unavailable: {0}")]
    Storage(Box<dyn std::error::Error + Send + Sync>),
}

/// A request or payload that breaks a domain rule.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid device serial {0:?}")]
    InvalidSerial(String),

    #[error("invalid object key {0:?}")]
    InvalidObjectKey(String),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("invalid value for {command}: {reason}")]
    InvalidValue {
        command: &'static str,
        reason: String,
    },

    #[error("temperature {value} is outside the safety bounds [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("device does not support {0}")]
    Unsupported(&'static str),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl ValidationError {
    pub(crate) fn invalid(command: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            command,
            reason: reason.into(),
        }
    }
}

/// A lookup that found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A device already holds the maximum number of live subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device {serial} already has {limit} live subscriptions")]
pub struct CapacityError {
    pub serial: String,
    pub limit: usize,
}
