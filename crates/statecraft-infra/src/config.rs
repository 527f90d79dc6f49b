//! Interpreter configuration loader.
//!
//! Reads `statecraft.toml` from a configuration directory and deserializes it
//! into [`InterpreterConfig`]. Falls back to defaults when the file is missing
//! or malformed.
//!
//! Only two groups of settings exist. `join_poll_*` bounds how long a Parallel
//! join waits for a branch output whose write lags the counter trigger, and
//! `[worker]` locates delegated task workers and paces reconnects while a
//! worker is still starting. In-process deployments can omit the file.

use std::path::Path;

use statecraft_types::config::InterpreterConfig;

/// File name looked up inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "statecraft.toml";

/// Load interpreter configuration from `{config_dir}/statecraft.toml`.
///
/// - If the file does not exist, returns [`InterpreterConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
pub async fn load_interpreter_config(config_dir: &Path) -> InterpreterConfig {
    let config_path = config_dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return InterpreterConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return InterpreterConfig::default();
        }
    };

    match toml::from_str::<InterpreterConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            InterpreterConfig::default()
        }
    }
}
