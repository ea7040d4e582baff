//! CLI configuration and data locations.

use std::path::{Path, PathBuf};

use quickaudit_core::config::EngineConfig;

use crate::error::CliError;

const APP_DIR_NAME: &str = "quickaudit";
const CONFIG_FILE_NAME: &str = "config.json";

pub const ENV_TOKEN: &str = "QUICKAUDIT_TOKEN";
pub const ENV_DATA_DIR: &str = "QUICKAUDIT_DATA_DIR";

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}

/// `--data-dir`, then `QUICKAUDIT_DATA_DIR`, then the platform data directory.
pub fn resolve_data_dir(
    explicit: Option<PathBuf>,
    from_env: Option<String>,
) -> Result<PathBuf, CliError> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    if let Some(dir) = from_env.filter(|dir| !dir.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

/// Load the engine config file, apply environment overrides and validate.
pub fn load_engine_config(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<EngineConfig, CliError> {
    let config = EngineConfig::load_from_path(path)?
        .with_env_overrides(lookup)
        .validate()?;
    Ok(config)
}

pub fn token_from_env() -> Option<String> {
    std::env::var(ENV_TOKEN)
        .ok()
        .filter(|token| !token.trim().is_empty())
}
