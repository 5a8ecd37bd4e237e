//! Configuration sections.
//!
//! Only `main.alias_preference` feeds the synchronization engine directly.
//! The other sections are read at startup and handed to whoever needs them.

use serde::{Deserialize, Serialize};

/// Behaviour of the patchbay itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainConfig {
    /// Which port name to display: 0 = canonical, 1 = alias #1, 2 = alias #2.
    /// Default: 2
    #[serde(default = "MainConfig::default_alias_preference")]
    pub alias_preference: u8,

    /// Transport poll interval in milliseconds. DSP load is polled at 5x this.
    /// Default: 120
    #[serde(default = "MainConfig::default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl MainConfig {
    fn default_alias_preference() -> u8 {
        2
    }

    fn default_refresh_interval_ms() -> u64 {
        120
    }
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            alias_preference: Self::default_alias_preference(),
            refresh_interval_ms: Self::default_refresh_interval_ms(),
        }
    }
}

/// Canvas look and feel. Consumed by canvas implementations, never by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "CanvasConfig::default_theme")]
    pub theme: String,

    #[serde(default)]
    pub auto_hide_groups: bool,

    #[serde(default = "CanvasConfig::default_true")]
    pub use_bezier_lines: bool,

    /// 0 = none, 1 = small, 2 = full
    #[serde(default = "CanvasConfig::default_small")]
    pub antialiasing: u8,

    /// 0 = none, 1 = small, 2 = full
    #[serde(default = "CanvasConfig::default_small")]
    pub eyecandy: u8,

    #[serde(default)]
    pub use_opengl: bool,

    #[serde(default)]
    pub high_quality_antialiasing: bool,
}

impl CanvasConfig {
    fn default_theme() -> String {
        "Modern Dark".to_string()
    }

    fn default_true() -> bool {
        true
    }

    fn default_small() -> u8 {
        1
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            theme: Self::default_theme(),
            auto_hide_groups: false,
            use_bezier_lines: true,
            antialiasing: Self::default_small(),
            eyecandy: Self::default_small(),
            use_opengl: false,
            high_quality_antialiasing: false,
        }
    }
}

/// Server session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server backend: "loopback" or "pipewire".
    /// Default: loopback
    #[serde(default = "EngineConfig::default_backend")]
    pub backend: String,

    /// Capacity of the callback -> consumer notification queue.
    /// Default: 1024
    #[serde(default = "EngineConfig::default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Client name registered with the server.
    /// Default: patchbay
    #[serde(default = "EngineConfig::default_client_name")]
    pub client_name: String,
}

impl EngineConfig {
    fn default_backend() -> String {
        "loopback".to_string()
    }

    fn default_event_queue_capacity() -> usize {
        1024
    }

    fn default_client_name() -> String {
        "patchbay".to_string()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            event_queue_capacity: Self::default_event_queue_capacity(),
            client_name: Self::default_client_name(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
