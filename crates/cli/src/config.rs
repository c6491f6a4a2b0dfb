use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lanes_core::SchedulerConfig;
use tracing::debug;

/// Return the default config directory path: ~/.config/lanes/
pub fn default_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("could not determine user config directory")?
        .join("lanes");
    Ok(config_dir)
}

/// Return the default config file path: ~/.config/lanes/config.toml
pub fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

/// Load scheduler config.
///
/// An explicit path must exist. Without one, the default path is used when
/// present; otherwise defaults plus `LANES_*` environment overrides apply.
pub fn load(path: Option<&str>) -> Result<SchedulerConfig> {
    match path {
        Some(p) => load_file(Path::new(p)),
        None => {
            let default = default_config_path().ok().filter(|p| p.exists());
            match default {
                Some(p) => load_file(&p),
                None => {
                    debug!("No config file found, using defaults and environment");
                    SchedulerConfig::from_env().context("invalid scheduler config in environment")
                }
            }
        }
    }
}

fn load_file(path: &Path) -> Result<SchedulerConfig> {
    debug!(path = %path.display(), "Loading config");
    SchedulerConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}
