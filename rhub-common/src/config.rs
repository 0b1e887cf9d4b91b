//! Configuration loading and data-directory resolution
//!
//! Data directory priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents (`~/.config/recallhub/recallhub.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Data directory override
    pub data_dir: Option<String>,
    /// Log filter override (e.g. "rhub_ingest=debug")
    pub log_filter: Option<String>,
}

/// Resolve the data directory for a RecallHub service
pub fn resolve_data_dir(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_toml_config() {
        if let Some(dir) = config.data_dir {
            return PathBuf::from(dir);
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_dir()
}

/// Load the TOML config file from the platform config directory
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = toml_config_path()
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
    if !path.exists() {
        return Err(Error::Config(format!("Config file not found: {}", path.display())));
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write the TOML config file atomically (best-effort)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Platform config file path (`<config_dir>/recallhub/recallhub.toml`)
pub fn toml_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("recallhub").join("recallhub.toml"))
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("recallhub"))
        .unwrap_or_else(|| PathBuf::from("./recallhub_data"))
}

/// Ensure the data directory exists and return the database path inside it
pub fn ensure_data_dir(data_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join("recallhub.db"))
}
