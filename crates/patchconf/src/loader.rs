//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, PatchConfig};
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/patchbay/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("patchbay/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("patchbay.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Overlay the keys present in `table` onto `config`.
///
/// Keys the file does not mention keep their current value, so a later file
/// only needs to carry what it changes.
pub fn apply_table(
    config: &mut PatchConfig,
    table: &toml::Table,
    path: &Path,
) -> Result<(), ConfigError> {
    let wrong_type = |key: &str, expected: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must be {}", key, expected),
    };

    if let Some(main) = table.get("main").and_then(|v| v.as_table()) {
        if let Some(v) = main.get("alias_preference") {
            let v = v
                .as_integer()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| wrong_type("main.alias_preference", "a small integer"))?;
            config.main.alias_preference = v;
        }
        if let Some(v) = main.get("refresh_interval_ms") {
            let v = v
                .as_integer()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| wrong_type("main.refresh_interval_ms", "a positive integer"))?;
            config.main.refresh_interval_ms = v;
        }
    }

    if let Some(canvas) = table.get("canvas").and_then(|v| v.as_table()) {
        if let Some(v) = canvas.get("theme").and_then(|v| v.as_str()) {
            config.canvas.theme = v.to_string();
        }
        if let Some(v) = canvas.get("auto_hide_groups").and_then(|v| v.as_bool()) {
            config.canvas.auto_hide_groups = v;
        }
        if let Some(v) = canvas.get("use_bezier_lines").and_then(|v| v.as_bool()) {
            config.canvas.use_bezier_lines = v;
        }
        if let Some(v) = canvas.get("antialiasing").and_then(|v| v.as_integer()) {
            config.canvas.antialiasing = v.clamp(0, 2) as u8;
        }
        if let Some(v) = canvas.get("eyecandy").and_then(|v| v.as_integer()) {
            config.canvas.eyecandy = v.clamp(0, 2) as u8;
        }
        if let Some(v) = canvas.get("use_opengl").and_then(|v| v.as_bool()) {
            config.canvas.use_opengl = v;
        }
        if let Some(v) = canvas
            .get("high_quality_antialiasing")
            .and_then(|v| v.as_bool())
        {
            config.canvas.high_quality_antialiasing = v;
        }
    }

    if let Some(engine) = table.get("engine").and_then(|v| v.as_table()) {
        if let Some(v) = engine.get("backend").and_then(|v| v.as_str()) {
            config.engine.backend = v.to_string();
        }
        if let Some(v) = engine.get("event_queue_capacity") {
            let v = v
                .as_integer()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| wrong_type("engine.event_queue_capacity", "a positive integer"))?;
            config.engine.event_queue_capacity = v;
        }
        if let Some(v) = engine.get("client_name").and_then(|v| v.as_str()) {
            config.engine.client_name = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
///
/// `lookup` is `std::env::var` in production; tests pass a map.
pub fn apply_env_overrides<F>(
    config: &mut PatchConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let parse_err = |key: &str, value: &str| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("cannot parse {:?}", value),
    };

    if let Some(v) = lookup("PATCHBAY_ALIAS_PREFERENCE") {
        config.main.alias_preference = v
            .trim()
            .parse()
            .map_err(|_| parse_err("PATCHBAY_ALIAS_PREFERENCE", &v))?;
        sources.env_overrides.push("PATCHBAY_ALIAS_PREFERENCE".to_string());
    }
    if let Some(v) = lookup("PATCHBAY_REFRESH_INTERVAL_MS") {
        config.main.refresh_interval_ms = v
            .trim()
            .parse()
            .map_err(|_| parse_err("PATCHBAY_REFRESH_INTERVAL_MS", &v))?;
        sources.env_overrides.push("PATCHBAY_REFRESH_INTERVAL_MS".to_string());
    }
    if let Some(v) = lookup("PATCHBAY_THEME") {
        config.canvas.theme = v;
        sources.env_overrides.push("PATCHBAY_THEME".to_string());
    }
    if let Some(v) = lookup("PATCHBAY_BACKEND") {
        config.engine.backend = v;
        sources.env_overrides.push("PATCHBAY_BACKEND".to_string());
    }
    if let Some(v) = lookup("PATCHBAY_EVENT_QUEUE_CAPACITY") {
        config.engine.event_queue_capacity = v
            .trim()
            .parse()
            .map_err(|_| parse_err("PATCHBAY_EVENT_QUEUE_CAPACITY", &v))?;
        sources.env_overrides.push("PATCHBAY_EVENT_QUEUE_CAPACITY".to_string());
    }
    if let Some(v) = lookup("PATCHBAY_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("PATCHBAY_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over our own knob
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml: &str) -> PatchConfig {
        let table: toml::Table = toml.parse().unwrap();
        let mut config = PatchConfig::default();
        apply_table(&mut config, &table, Path::new("test.toml")).unwrap();
        config
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[main]
alias_preference = 0
"#,
        );
        assert_eq!(config.main.alias_preference, 0);
        // Other values should be defaults
        assert_eq!(config.main.refresh_interval_ms, 120);
        assert_eq!(config.engine.backend, "loopback");
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[main]
alias_preference = 1
refresh_interval_ms = 60

[canvas]
theme = "Classic"
auto_hide_groups = true
use_bezier_lines = false
antialiasing = 2
eyecandy = 0

[engine]
backend = "pipewire"
event_queue_capacity = 4096
client_name = "catia"

[telemetry]
log_level = "debug"
"#,
        );

        assert_eq!(config.main.alias_preference, 1);
        assert_eq!(config.main.refresh_interval_ms, 60);
        assert_eq!(config.canvas.theme, "Classic");
        assert!(config.canvas.auto_hide_groups);
        assert!(!config.canvas.use_bezier_lines);
        assert_eq!(config.canvas.antialiasing, 2);
        assert_eq!(config.canvas.eyecandy, 0);
        assert_eq!(config.engine.backend, "pipewire");
        assert_eq!(config.engine.event_queue_capacity, 4096);
        assert_eq!(config.engine.client_name, "catia");
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_later_file_only_overrides_its_keys() {
        let mut config = parse("[main]\nalias_preference = 1\n");
        let overlay: toml::Table = "[main]\nrefresh_interval_ms = 500\n".parse().unwrap();
        apply_table(&mut config, &overlay, Path::new("local.toml")).unwrap();

        assert_eq!(config.main.alias_preference, 1);
        assert_eq!(config.main.refresh_interval_ms, 500);
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let table: toml::Table = "[main]\nalias_preference = \"two\"\n".parse().unwrap();
        let mut config = PatchConfig::default();
        let err = apply_table(&mut config, &table, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PATCHBAY_ALIAS_PREFERENCE", "0"),
            ("PATCHBAY_BACKEND", "pipewire"),
            ("RUST_LOG", "patchgraph=trace"),
        ]
        .into_iter()
        .collect();

        let mut config = PatchConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources, |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.main.alias_preference, 0);
        assert_eq!(config.engine.backend, "pipewire");
        assert_eq!(config.telemetry.log_level, "patchgraph=trace");
        assert_eq!(sources.env_overrides.len(), 3);
    }

    #[test]
    fn test_env_override_unparseable() {
        let mut config = PatchConfig::default();
        let mut sources = ConfigSources::default();
        let err = apply_env_overrides(&mut config, &mut sources, |k| {
            (k == "PATCHBAY_REFRESH_INTERVAL_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_load_table_missing_file() {
        let err = load_table(Path::new("/nonexistent/patchbay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
