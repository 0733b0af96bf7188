//! Engine configuration loader for plexflow.
//!
//! Reads `plexflow.toml` from a configuration directory and deserializes it
//! into [`EngineConfig`]. The lenient loader falls back to defaults when the
//! file is missing or malformed; the strict loader reports why.

use std::path::Path;

use plexflow_types::config::EngineConfig;
use thiserror::Error;

/// File name looked up by [`load_engine_config`].
pub const CONFIG_FILE_NAME: &str = "plexflow.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Load engine configuration from `{config_dir}/plexflow.toml`.
///
/// The file sets the default step timeout, the resolver's round cap and
/// concurrency, the activity retry policy and the child-workflow depth limit.
/// Any key left out keeps its default.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
pub async fn load_engine_config(config_dir: &Path) -> EngineConfig {
    let config_path = config_dir.join(CONFIG_FILE_NAME);
    if !tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
        tracing::debug!(path = %config_path.display(), "no engine config file, using defaults");
        return EngineConfig::default();
    }

    match load_engine_config_file(&config_path).await {
        Ok(config) => {
            tracing::debug!(
                path = %config_path.display(),
                step_timeout_secs = config.default_step_timeout_secs,
                max_attempts = config.retry.max_attempts,
                "loaded engine config"
            );
            config
        }
        Err(err) => {
            tracing::warn!(error = %err, "invalid engine config, using defaults");
            EngineConfig::default()
        }
    }
}

/// Load engine configuration from an explicit file, failing on any error.
pub async fn load_engine_config_file(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
