//! Engine configuration

use crate::error::{EngineError, Result};
use crate::filter::AllowedTypes;
use std::path::PathBuf;
use std::time::Duration;

/// Display name used when the host name is unknown
pub const FALLBACK_DISPLAY_NAME: &str = "Drift";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name advertised to other devices
    pub display_name: String,

    /// Directory for received and materialized items
    pub temp_dir: PathBuf,

    /// Initial allowed-type filter (empty = allow all)
    pub allowed_types: AllowedTypes,

    /// Transfer configuration
    pub transfer: TransferConfig,

    /// Automatic known-item cleanup
    pub cleanup: CleanupConfig,

    /// Capacity of the command channel
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            temp_dir: std::env::temp_dir(),
            allowed_types: AllowedTypes::default(),
            transfer: TransferConfig::default(),
            cleanup: CleanupConfig::default(),
            command_buffer: 64,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] for an empty display name, a
    /// zero chunk size or a zero command buffer.
    pub fn validate(&self) -> Result<()> {
        if self.display_name.trim().is_empty() {
            return Err(EngineError::invalid_config("display name is empty"));
        }
        if self.transfer.chunk_size == 0 {
            return Err(EngineError::invalid_config("chunk size must be non-zero"));
        }
        if self.command_buffer == 0 {
            return Err(EngineError::invalid_config("command buffer must be non-zero"));
        }
        if self.cleanup.interval.is_some_and(|i| i.is_zero()) {
            return Err(EngineError::invalid_config("cleanup interval must be non-zero"));
        }
        Ok(())
    }
}

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes per outgoing chunk
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: drift_files::DEFAULT_READ_SIZE,
        }
    }
}

/// Automatic cleanup of known items
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How often to check; `None` disables automatic cleanup
    pub interval: Option<Duration>,

    /// Idle time (no add, retain or release) before the registry is cleared
    pub idle_after: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(30)),
            idle_after: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Host name from the environment, or [`FALLBACK_DISPLAY_NAME`]
#[must_use]
pub fn default_display_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
}
