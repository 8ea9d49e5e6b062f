//! Writer configuration using Figment
//!
//! Configuration is layered, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. A TOML file (optional, e.g. `config/stream_writer.toml`)
//! 3. Environment variables prefixed with `DAQ_STREAM_`
//!
//! ```text
//! DAQ_STREAM_LOG_LEVEL=debug
//! DAQ_STREAM_DEFAULT_TIMEOUT_MS=2000
//! DAQ_STREAM_FORMAT_SPEC=AD_HDF5_SWMR_SLICE
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_daq_stream::config::WriterConfig;
//!
//! let config = WriterConfig::load_from("config/stream_writer.toml")?;
//! println!("flush timeout: {:?}", config.default_timeout());
//! # Ok::<(), rust_daq_stream::config::ConfigError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer failed to parse or extract
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// Values loaded but are not usable
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Settings shared by every writer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human readable text
    #[serde(default)]
    pub json_logs: bool,
    /// Bound for every hardware wait not covered by a more specific setting
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Per-update bound while observing the captured-frame counter
    #[serde(default = "default_timeout_ms")]
    pub observe_timeout_ms: u64,
    /// Capacity of the channel between the counter poller and its consumer
    #[serde(default = "default_observe_buffer")]
    pub observe_buffer: usize,
    /// Sink-side file naming template
    #[serde(default = "default_file_template")]
    pub file_template: String,
    /// Intra-file location of the primary detector array
    #[serde(default = "default_primary_dataset_path")]
    pub primary_dataset_path: String,
    /// Intra-file group holding scalar attribute datasets
    #[serde(default = "default_attribute_dataset_root")]
    pub attribute_dataset_root: String,
    /// Format identifier stamped on every stream resource
    #[serde(default = "default_format_spec")]
    pub format_spec: String,
    /// Grouping block recorded in resource parameters
    #[serde(default = "default_block")]
    pub block: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_observe_buffer() -> usize {
    16
}

fn default_file_template() -> String {
    "%s%s_%3.3d.h5".to_string()
}

fn default_primary_dataset_path() -> String {
    "/entry/data/data".to_string()
}

fn default_attribute_dataset_root() -> String {
    "/entry/instrument/NDAttributes".to_string()
}

fn default_format_spec() -> String {
    "STREAMING_ARRAY_SLICE".to_string()
}

fn default_block() -> String {
    "hdf".to_string()
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            default_timeout_ms: default_timeout_ms(),
            observe_timeout_ms: default_timeout_ms(),
            observe_buffer: default_observe_buffer(),
            file_template: default_file_template(),
            primary_dataset_path: default_primary_dataset_path(),
            attribute_dataset_root: default_attribute_dataset_root(),
            format_spec: default_format_spec(),
            block: default_block(),
        }
    }
}

impl WriterConfig {
    /// Load from defaults and `DAQ_STREAM_` environment variables only.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment())
    }

    /// Load from a TOML file layered over defaults, then environment overrides.
    ///
    /// A missing file is not an error; Figment treats it as an empty layer.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(WriterConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("DAQ_STREAM_")),
        )
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(WriterConfig::default()))
            .merge(Env::prefixed("DAQ_STREAM_"))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.default_timeout_ms == 0 || self.observe_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Timeouts must be greater than 0 ms".to_string(),
            ));
        }

        if self.observe_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "observe_buffer must be at least 1".to_string(),
            ));
        }

        if self.file_template.is_empty() {
            return Err(ConfigError::ValidationError(
                "file_template cannot be empty".to_string(),
            ));
        }

        for (field, path) in [
            ("primary_dataset_path", &self.primary_dataset_path),
            ("attribute_dataset_root", &self.attribute_dataset_root),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be an absolute intra-file path, got '{}'",
                    field, path
                )));
            }
        }

        Ok(())
    }

    /// `default_timeout_ms` as a duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// `observe_timeout_ms` as a duration.
    pub fn observe_timeout(&self) -> Duration {
        Duration::from_millis(self.observe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = WriterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_timeout(), Duration::from_secs(10));
        assert_eq!(config.format_spec, "STREAMING_ARRAY_SLICE");
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "writer.toml",
                r#"
                log_level = "debug"
                default_timeout_ms = 500
                block = "hdf5"
                "#,
            )?;
            jail.set_env("DAQ_STREAM_DEFAULT_TIMEOUT_MS", "750");

            let config = WriterConfig::load_from("writer.toml").expect("config loads");
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.block, "hdf5");
            // Environment wins over the file
            assert_eq!(config.default_timeout_ms, 750);
            assert_eq!(config.observe_timeout_ms, 10_000);
            Ok(())
        });
    }

    #[test]
    fn test_shipped_config_file_loads() {
        Jail::expect_with(|_jail| {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/stream_writer.toml");
            let config = WriterConfig::load_from(path).expect("shipped config loads");
            assert_eq!(config, WriterConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let config = WriterConfig {
            log_level: "loud".to_string(),
            ..WriterConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_relative_dataset_path_rejected() {
        let config = WriterConfig {
            primary_dataset_path: "entry/data".to_string(),
            ..WriterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("DAQ_STREAM_OBSERVE_TIMEOUT_MS", "0");
            assert!(WriterConfig::load().is_err());
            Ok(())
        });
    }
}
