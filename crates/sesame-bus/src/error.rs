//! Bus error types.

use thiserror::Error;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Well-known remote error names.
pub mod names {
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
}

/// Errors produced by a bus transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The remote peer replied with a named error.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// The call was cancelled before a reply arrived.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The peer left the bus while the call was in flight.
    #[error("Peer disconnected from the bus")]
    Disconnected,

    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Name has no owner: {0}")]
    NoSuchName(String),

    /// A value could not be converted to or from its wire form.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The connection to the bus failed.
    #[error("Bus connection error: {0}")]
    Connection(String),
}

impl BusError {
    /// Build a remote error.
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Remote error name, if this is a remote error.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Remote { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_unknown_method(&self) -> bool {
        self.name() == Some(names::UNKNOWN_METHOD)
    }

    pub fn is_not_supported(&self) -> bool {
        self.name() == Some(names::NOT_SUPPORTED)
    }

    /// Whether the destination name could not be resolved.
    pub fn is_service_unknown(&self) -> bool {
        matches!(self, Self::NoSuchName(_)) || self.name() == Some(names::SERVICE_UNKNOWN)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the error was caused by the peer going away.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected) || self.is_service_unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_predicates() {
        let err = BusError::remote(names::UNKNOWN_METHOD, "No such method 'Dismiss'");
        assert!(err.is_unknown_method());
        assert!(!err.is_not_supported());
        assert_eq!(
            err.to_string(),
            "org.freedesktop.DBus.Error.UnknownMethod: No such method 'Dismiss'"
        );
    }

    #[test]
    fn test_disconnect_predicates() {
        assert!(BusError::Disconnected.is_disconnected());
        assert!(BusError::NoSuchName(":1.4".into()).is_disconnected());
        assert!(BusError::remote(names::SERVICE_UNKNOWN, "gone").is_service_unknown());
        assert!(!BusError::Cancelled.is_disconnected());
        assert_eq!(BusError::Cancelled.name(), None);
    }
}
