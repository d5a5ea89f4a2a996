//! Configuration system for the Drift CLI.

use drift_core::{AllowedTypes, CleanupConfig, EngineConfig, TransferConfig};
use drift_transport::LanConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Drift configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Device configuration
    #[serde(default)]
    pub device: DeviceConfig,
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferSettings,
    /// Known-item cleanup
    #[serde(default)]
    pub cleanup: CleanupSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceConfig {
    /// Advertised name (defaults to the host name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Directory for received items before they are saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP port for discovery beacons
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// TCP listen address for transfers
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Beacon destination address
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
    /// Seconds between beacons
    #[serde(default = "default_beacon_interval")]
    pub beacon_interval_secs: u64,
    /// Seconds of silence before a peer is dropped
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_secs: u64,
    /// Seconds an inbound stream may stay silent before it fails
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Types accepted by `receive` when no `--allow` is given
    #[serde(default)]
    pub allowed_types: Vec<String>,
}

/// Cleanup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    /// Seconds between cleanup checks (0 disables)
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Idle seconds before known items are cleared
    #[serde(default = "default_idle_after")]
    pub idle_after_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_discovery_port() -> u16 {
    47800
}

fn default_listen_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_broadcast_addr() -> String {
    "255.255.255.255".to_string()
}

fn default_beacon_interval() -> u64 {
    2
}

fn default_peer_timeout() -> u64 {
    7
}

fn default_read_timeout() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_idle_after() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            listen_addr: default_listen_addr(),
            broadcast_addr: default_broadcast_addr(),
            beacon_interval_secs: default_beacon_interval(),
            peer_timeout_secs: default_peer_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            allowed_types: Vec::new(),
        }
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            idle_after_secs: default_idle_after(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("drift/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.lan_config()?;

        if self.network.beacon_interval_secs == 0 {
            anyhow::bail!("Beacon interval must be at least 1 second");
        }
        if self.network.peer_timeout_secs <= self.network.beacon_interval_secs {
            anyhow::bail!("Peer timeout must be longer than the beacon interval");
        }
        if self.network.read_timeout_secs == 0 {
            anyhow::bail!("Read timeout must be at least 1 second");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > 16 * 1024 * 1024 {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        self.engine_config(&[]).validate()?;
        Ok(())
    }

    /// Build the LAN adapter configuration
    ///
    /// # Errors
    ///
    /// Returns an error if an address cannot be parsed.
    pub fn lan_config(&self) -> anyhow::Result<LanConfig> {
        let listen_addr: SocketAddr = self
            .network
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {e}", self.network.listen_addr))?;
        let broadcast_addr: IpAddr = self.network.broadcast_addr.parse().map_err(|e| {
            anyhow::anyhow!("Invalid broadcast address {}: {e}", self.network.broadcast_addr)
        })?;

        Ok(LanConfig {
            discovery_port: self.network.discovery_port,
            listen_addr,
            broadcast_addr,
            beacon_interval: Duration::from_secs(self.network.beacon_interval_secs),
            peer_timeout: Duration::from_secs(self.network.peer_timeout_secs),
            read_timeout: Duration::from_secs(self.network.read_timeout_secs),
        })
    }

    /// Build the engine configuration; `allow` overrides the configured types
    #[must_use]
    pub fn engine_config(&self, allow: &[String]) -> EngineConfig {
        let defaults = EngineConfig::default();
        let allowed: &[String] = if allow.is_empty() {
            &self.transfer.allowed_types
        } else {
            allow
        };

        EngineConfig {
            display_name: self
                .device
                .display_name
                .clone()
                .unwrap_or(defaults.display_name),
            temp_dir: self.device.temp_dir.clone().unwrap_or(defaults.temp_dir),
            allowed_types: allowed.iter().cloned().collect::<AllowedTypes>(),
            transfer: TransferConfig {
                chunk_size: self.transfer.chunk_size,
            },
            cleanup: CleanupConfig {
                interval: (self.cleanup.interval_secs > 0)
                    .then(|| Duration::from_secs(self.cleanup.interval_secs)),
                idle_after: Duration::from_secs(self.cleanup.idle_after_secs),
            },
            ..defaults
        }
    }
}
