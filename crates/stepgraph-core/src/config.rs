//! Engine configuration loader.
//!
//! Reads a `stepgraph.toml` file and deserializes it into [`EngineConfig`].
//! Falls back to defaults when the file is missing or malformed so a run
//! can always start.

use std::path::Path;

use stepgraph_types::config::EngineConfig;

/// File name looked up by [`load_engine_config_from_dir`].
pub const CONFIG_FILE_NAME: &str = "stepgraph.toml";

/// Load engine configuration from `path`.
///
/// - Missing file: returns [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
/// - Otherwise returns the parsed config with `max_concurrency` and
///   `max_concurrent_runs` clamped to at least 1.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(mut config) => {
            if config.max_concurrency == 0 {
                tracing::warn!("max_concurrency = 0 in {}, clamping to 1", path.display());
                config.max_concurrency = 1;
            }
            if config.max_concurrent_runs == Some(0) {
                tracing::warn!("max_concurrent_runs = 0 in {}, clamping to 1", path.display());
                config.max_concurrent_runs = Some(1);
            }
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Load `{dir}/stepgraph.toml`.
pub async fn load_engine_config_from_dir(dir: &Path) -> EngineConfig {
    load_engine_config(&dir.join(CONFIG_FILE_NAME)).await
}
