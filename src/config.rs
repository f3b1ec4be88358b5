//! Engine configuration
//!
//! Defaults, overridden by environment variables. A `.env` file in the
//! working directory (or its parent) is loaded first.
//!
//! | Variable                  | Meaning                              |
//! |---------------------------|--------------------------------------|
//! | `CODEMOD_THREADS`         | worker count (default: CPU count)    |
//! | `CODEMOD_IDLE_TIMEOUT_MS` | worker pool idle timeout (30000)     |
//! | `CODEMOD_OUTPUT_DIR`      | dry-run preview directory            |
//! | `CODEMOD_FORMAT`          | format generated code (true)         |

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default idle timeout of the worker pool.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime configuration for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub threads: usize,
    pub idle_timeout: Duration,
    pub output_dir: PathBuf,
    pub format: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            output_dir: default_output_dir(),
            format: true,
        }
    }
}

impl EngineConfig {
    /// Load `.env` and apply environment overrides on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("CODEMOD_THREADS") {
            config.threads = parse_env("CODEMOD_THREADS", &value)?;
            config.threads = config.threads.max(1);
        }
        if let Some(value) = lookup("CODEMOD_IDLE_TIMEOUT_MS") {
            config.idle_timeout =
                Duration::from_millis(parse_env("CODEMOD_IDLE_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("CODEMOD_OUTPUT_DIR") {
            if !value.trim().is_empty() {
                config.output_dir = PathBuf::from(value.trim());
            }
        }
        if let Some(value) = lookup("CODEMOD_FORMAT") {
            config.format = parse_env("CODEMOD_FORMAT", &value)?;
        }

        tracing::debug!(
            threads = config.threads,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            format = config.format,
            "Engine configuration loaded"
        );
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// `<cache dir>/codemod/previews`, or the temp dir when no cache dir exists.
fn default_output_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("codemod")
        .join("previews")
}
