//! Loader configuration
//!
//! [`LoaderConfig`] is read from the `[loader]` section of
//! `config/postfetch.toml`, overlaid by `POSTFETCH__LOADER__*` environment
//! variables, using `LoaderConfig::load()`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "config/postfetch.toml";
const ENV_PREFIX: &str = "POSTFETCH";

/// What to do with a requested field that is not a declared association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFieldPolicy {
    /// Log a warning and drop the field
    #[default]
    Warn,
    /// Abort the load with `LoadError::UnknownField`
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub unknown_fields: UnknownFieldPolicy,
    /// Record and log every batch query in `LoggingGateway`
    #[serde(default = "default_log_queries")]
    pub log_queries: bool,
    /// Queries slower than this are logged at warn level
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,
}

fn default_log_queries() -> bool {
    true
}

fn default_slow_query_ms() -> u64 {
    100
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            unknown_fields: UnknownFieldPolicy::default(),
            log_queries: default_log_queries(),
            slow_query_ms: default_slow_query_ms(),
        }
    }
}

impl LoaderConfig {
    /// Load from `config/postfetch.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from the given TOML file (optional) overlaid by env vars.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // An unreadable file should not hide the env configuration
                if path.exists() {
                    log::warn!("failed to load {}, falling back to env: {err}", path.display());
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        // A missing section means defaults
        match settings.get::<LoaderConfig>("loader") {
            Ok(cfg) => Ok(cfg),
            Err(ConfigError::NotFound(_)) => Ok(LoaderConfig::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "Loader configuration could not be loaded from file or environment: {e}"
            ))),
        }
    }

    pub fn with_unknown_fields(mut self, policy: UnknownFieldPolicy) -> Self {
        self.unknown_fields = policy;
        self
    }
}
