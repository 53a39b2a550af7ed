pub mod config_cmd;
pub mod doctor;
pub mod gateway;
pub mod tools;

use std::path::{Path, PathBuf};

use parlor_config::{AppConfig, ConfigError};

/// The explicit `--config` path, or `~/.parlor/config.toml`.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load the configuration with environment overrides applied.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    AppConfig::load_with_env(&config_file(explicit))
}
