//! Engine configuration loader for waypoint.
//!
//! Reads `config.toml` from the data directory (`~/.waypoint/` by default)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use waypoint_types::config::EngineConfig;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "WAYPOINT_DATA_DIR";

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Resolve the waypoint data directory.
///
/// Priority:
/// 1. `WAYPOINT_DATA_DIR` environment variable
/// 2. `~/.waypoint`
/// 3. `.waypoint` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".waypoint");
    }

    PathBuf::from(".waypoint")
}

/// Snapshot directory: the configured override, else `{data_dir}/state`.
///
/// A relative override is resolved against `data_dir`.
pub fn state_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    match &config.state_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => data_dir.join(dir),
        None => data_dir.join("state"),
    }
}
