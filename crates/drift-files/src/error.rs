//! Error types for the item store.

use std::path::PathBuf;
use thiserror::Error;

/// Item store errors
#[derive(Debug, Error)]
pub enum ItemError {
    /// File or stream access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Source file for an item cannot be accessed
    #[error("cannot access {}: {source}", path.display())]
    Inaccessible {
        /// Path that was requested
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// The item already has caller-owned storage
    #[error("item is already persistent")]
    AlreadyPersistent,
}

/// Result type for item store operations
pub type Result<T> = std::result::Result<T, ItemError>;
