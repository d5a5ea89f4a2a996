//! Error types for the engine
//!
//! [`EngineError`] is `Clone` so that transfer failures can travel inside
//! [`EngineEvent`](crate::EngineEvent)s to every observer.
//!
//! # Error Categories
//!
//! - **Synchronous**: returned directly by a command (`InvalidState`,
//!   `AlreadyPersistent`, `RetainUnderflow`, `InvalidConfig`, `Channel`)
//! - **Asynchronous**: carried by a `*Finished` event when a transfer fails
//!   (`Io`, `Transport`, `Cancelled`)

use drift_files::ItemError;
use drift_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors that can occur in engine operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// File or stream I/O failed
    #[error("I/O error: {0}")]
    Io(Cow<'static, str>),

    /// Operation not valid in the engine's current state
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),

    /// Item storage is already caller-owned
    #[error("Item is already persistent")]
    AlreadyPersistent,

    /// `release` called more often than `retain`
    #[error("Known items released more often than retained")]
    RetainUnderflow,

    /// Transport adapter failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Transfer aborted because the engine stopped
    #[error("Transfer cancelled")]
    Cancelled,

    /// Engine task is gone
    #[error("Channel error: {0}")]
    Channel(Cow<'static, str>),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl EngineError {
    /// Returns true if the error terminated a transfer rather than a command
    #[must_use]
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Io(_) | EngineError::Transport(_) | EngineError::Cancelled
        )
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        EngineError::InvalidState(Cow::Borrowed(context))
    }

    /// Create an invalid config error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        EngineError::InvalidConfig(Cow::Borrowed(context))
    }

    /// Create a channel error with static context (zero allocation)
    #[must_use]
    pub const fn channel(context: &'static str) -> Self {
        EngineError::Channel(Cow::Borrowed(context))
    }
}

impl From<ItemError> for EngineError {
    fn from(err: ItemError) -> Self {
        match err {
            ItemError::AlreadyPersistent => EngineError::AlreadyPersistent,
            other => EngineError::Io(Cow::Owned(other.to_string())),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(Cow::Owned(err.to_string()))
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_error_conversion() {
        assert_eq!(
            EngineError::from(ItemError::AlreadyPersistent),
            EngineError::AlreadyPersistent
        );
        let io = ItemError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(EngineError::from(io), EngineError::Io(msg) if msg.contains("gone")));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: EngineError = TransportError::Closed.into();
        assert_eq!(err, EngineError::Transport(TransportError::Closed));
        assert!(err.is_transfer_failure());
    }

    #[test]
    fn test_transfer_failure_classification() {
        assert!(EngineError::Cancelled.is_transfer_failure());
        assert!(EngineError::Io(Cow::Borrowed("x")).is_transfer_failure());
        assert!(!EngineError::RetainUnderflow.is_transfer_failure());
        assert!(!EngineError::invalid_state("stopped").is_transfer_failure());
    }

    #[test]
    fn test_static_constructors() {
        assert_eq!(
            EngineError::invalid_state("engine is started").to_string(),
            "Invalid state: engine is started"
        );
        assert_eq!(
            EngineError::channel("engine task exited").to_string(),
            "Channel error: engine task exited"
        );
    }
}
