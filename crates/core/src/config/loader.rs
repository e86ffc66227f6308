use figment::{
    providers::{Env, Format, Toml},
    value::{Uncased, UncasedStr},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment variables that override the configuration file.
pub const ENV_PREFIX: &str = "DRP_";

/// Map `DRP_<SECTION>_<KEY>` to `section.key`.
///
/// Only the first underscore separates the section, so multi-word keys like
/// `DRP_ORCHESTRATOR_MAX_WORKERS` keep their name. `DRP_STOP_FILE` is
/// accepted as a shorthand for `DRP_ORCHESTRATOR_STOP_FILE`.
fn env_key(key: &UncasedStr) -> Uncased<'_> {
    let key = key.as_str().to_ascii_lowercase();
    if key == "stop_file" {
        return "orchestrator.stop_file".to_string().into();
    }
    key.replacen('_', ".", 1).into()
}

fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).map(env_key))
}

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    figment_for(path)
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration, falling back to defaults when the file is missing.
///
/// Environment overrides apply either way.
pub fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Configuration file not found, using defaults");
    }

    figment_for(path)
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
