//! Error types for Secret Service operations.

use sesame_bus::BusError;
use sesame_core::ConfigError;
use thiserror::Error;

/// Message used when the service misbehaves during session negotiation.
pub(crate) const COULD_NOT_COMMUNICATE: &str = "Couldn't communicate with the secret storage";

/// Message used when a transferred secret fails to decode.
pub(crate) const INVALID_SECRET: &str = "Received invalid secret from the secret storage";

/// Errors that can occur during secret operations.
///
/// A dismissed prompt is not an error; it is reported through
/// [`PromptOutcome`](crate::prompt::PromptOutcome).
#[derive(Debug, Error)]
pub enum SecretError {
    /// A transport error, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] BusError),

    /// The service replied with something the protocol does not allow.
    #[error("{0}")]
    Protocol(String),

    /// Attributes that do not fit a password schema.
    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("Prompt was already performed")]
    AlreadyTriggered,

    #[error("No such secret object: {0}")]
    UnknownObject(String),

    /// The service proxy this object belongs to has been dropped.
    #[error("Secret service connection is closed")]
    ServiceClosed,

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SecretError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// The underlying transport error, if any.
    pub fn as_transport(&self) -> Option<&BusError> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience result alias for secret operations.
pub type Result<T> = std::result::Result<T, SecretError>;
