//! Configuration system for the callwire CLI.

use callwire_peer::DataChannelInit;
use callwire_stats::MonitorConfig;
use callwire_transfer::TransferConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// callwire configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Quality monitor configuration
    #[serde(default)]
    pub monitor: MonitorSection,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Quality monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    /// Sampling interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Data channel label
    #[serde(default = "default_label")]
    pub label: String,
    /// Chunk payload size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest message the channel accepts
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Floor for quality-reduced chunk sizes
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    /// Buffered amount to wait for between chunks
    #[serde(default)]
    pub buffered_amount_low_threshold: usize,
    /// Backpressure wait limit in milliseconds
    #[serde(default = "default_backpressure_timeout_ms")]
    pub backpressure_timeout_ms: u64,
    /// Largest payload in bytes
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
    /// Inbound sessions held at once
    #[serde(default = "default_max_inbound_sessions")]
    pub max_inbound_sessions: usize,
    /// Inbound session idle timeout in seconds
    #[serde(default = "default_inbound_session_timeout_secs")]
    pub inbound_session_timeout_secs: u64,
    /// Per-message lifetime in milliseconds
    #[serde(default = "default_max_packet_life_time_ms")]
    pub max_packet_life_time_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_interval_ms() -> u64 {
    2_000
}

fn default_label() -> String {
    "callwire-transfer".to_string()
}

fn default_chunk_size() -> usize {
    16_000
}

fn default_max_message_size() -> usize {
    16 * 1024
}

fn default_min_chunk_size() -> usize {
    1024
}

fn default_backpressure_timeout_ms() -> u64 {
    10_000
}

fn default_max_payload_size() -> usize {
    256 * 1024 * 1024
}

fn default_max_inbound_sessions() -> usize {
    16
}

fn default_inbound_session_timeout_secs() -> u64 {
    60
}

fn default_max_packet_life_time_ms() -> u64 {
    3_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            label: default_label(),
            chunk_size: default_chunk_size(),
            max_message_size: default_max_message_size(),
            min_chunk_size: default_min_chunk_size(),
            buffered_amount_low_threshold: 0,
            backpressure_timeout_ms: default_backpressure_timeout_ms(),
            max_payload_size: default_max_payload_size(),
            max_inbound_sessions: default_max_inbound_sessions(),
            inbound_session_timeout_secs: default_inbound_session_timeout_secs(),
            max_packet_life_time_ms: default_max_packet_life_time_ms(),
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

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("callwire/config.toml")
    }

    /// Load config from the default path, or use defaults if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Quality monitor settings
    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(self.monitor.interval_ms),
        }
    }

    /// Transfer engine settings
    #[must_use]
    pub fn transfer_config(&self) -> TransferConfig {
        let t = &self.transfer;
        TransferConfig {
            chunk_size: t.chunk_size,
            max_message_size: t.max_message_size,
            min_chunk_size: t.min_chunk_size,
            buffered_amount_low_threshold: t.buffered_amount_low_threshold,
            backpressure_timeout: Duration::from_millis(t.backpressure_timeout_ms),
            max_payload_size: t.max_payload_size,
            max_inbound_sessions: t.max_inbound_sessions,
            inbound_session_timeout: Duration::from_secs(t.inbound_session_timeout_secs),
            channel: DataChannelInit {
                max_packet_life_time: Some(Duration::from_millis(t.max_packet_life_time_ms)),
                ..DataChannelInit::default()
            },
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.transfer.label.is_empty() {
            anyhow::bail!("Transfer channel label must not be empty");
        }

        if self.transfer.max_packet_life_time_ms == 0 {
            anyhow::bail!("max_packet_life_time_ms must be non-zero");
        }

        self.monitor_config().validate()?;
        self.transfer_config().validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.monitor.interval_ms, 2_000);
        assert_eq!(config.transfer.chunk_size, 16_000);
        assert_eq!(config.transfer.max_message_size, 16_384);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_maps_onto_library_configs() {
        let config = Config::default();

        let transfer = config.transfer_config();
        assert_eq!(transfer.chunk_size, TransferConfig::default().chunk_size);
        assert_eq!(
            transfer.channel.max_packet_life_time,
            Some(Duration::from_secs(3))
        );
        assert_eq!(transfer.inbound_session_timeout, Duration::from_secs(60));

        assert_eq!(config.monitor_config().interval, Duration::from_secs(2));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.transfer.chunk_size = 16_384;
        assert!(config.validate().is_err());

        config.transfer.chunk_size = 8_000;
        config.monitor.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [transfer]
            chunk_size = 4000
            "#,
        )
        .unwrap();

        assert_eq!(config.transfer.chunk_size, 4_000);
        assert_eq!(config.transfer.max_message_size, 16_384);
        assert_eq!(config.monitor.interval_ms, 2_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::default();
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.transfer.label, config.transfer.label);
        assert_eq!(loaded.monitor.interval_ms, config.monitor.interval_ms);
    }
}
