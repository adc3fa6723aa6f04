//! Configuration loading.
//!
//! The TOML file is looked up in this order:
//! - the first command-line argument
//! - `$WSGATE_CONFIG`
//! - `wsgate.toml` in the working directory
//!
//! A missing file means defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use wsgate_gate::GateConfig;

pub const CONFIG_ENV: &str = "WSGATE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "wsgate.toml";

/// Picks the configuration path from the CLI argument or the environment.
pub fn config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Loads the configuration at `path`, or defaults if it does not exist.
pub fn load(path: &Path) -> anyhow::Result<GateConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(GateConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: GateConfig =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;

    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}
