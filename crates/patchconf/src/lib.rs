//! Configuration loading for the patchbay.
//!
//! Plain serde structs with compiled defaults, overlaid by TOML files and
//! environment variables.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/patchbay/config.toml` (system)
//! 2. `~/.config/patchbay/config.toml` (user)
//! 3. `./patchbay.toml` (local override, replaced by an explicit path)
//! 4. Environment variables (`PATCHBAY_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [main]
//! alias_preference = 1
//! refresh_interval_ms = 120
//!
//! [canvas]
//! theme = "Modern Dark"
//! use_bezier_lines = true
//!
//! [engine]
//! backend = "pipewire"
//! event_queue_capacity = 2048
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};
pub use sections::{CanvasConfig, EngineConfig, MainConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete patchbay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PatchConfig {
    #[serde(default)]
    pub main: MainConfig,

    #[serde(default)]
    pub canvas: CanvasConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl PatchConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local `./patchbay.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where the values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = PatchConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::apply_table(&mut config, &table, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources, |key| std::env::var(key).ok())?;

        config.validate()?;
        Ok((config, sources))
    }

    /// Check cross-field and range constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.main.alias_preference > 2 {
            return Err(ConfigError::Invalid {
                key: "main.alias_preference".to_string(),
                message: format!("expected 0, 1 or 2, got {}", self.main.alias_preference),
            });
        }
        if self.main.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "main.refresh_interval_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.engine.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "engine.event_queue_capacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_default();
        format!("# Patchbay Configuration\n\n{}", body)
    }
}
