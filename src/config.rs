//! Session configuration.
//!
//! This module provides TOML configuration loading from `~/.wpty/config.toml`:
//!
//! ```toml
//! # Shell command line
//! shell = "pwsh.exe"
//!
//! # Initial terminal size
//! cols = 120
//! rows = 30
//!
//! # Console codepage the child is expected to use (65001 for UTF-8)
//! codepage = 65001
//! ```
//!
//! Missing file or unparsable content falls back to defaults; the OS-facing
//! session layer never depends on a config file being present.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell command line to launch
    pub shell: String,
    /// Terminal width in columns
    pub cols: u16,
    /// Terminal height in rows
    pub rows: u16,
    /// Expected console codepage (65001 for UTF-8)
    pub codepage: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: "cmd.exe".to_string(),
            cols: 120,
            rows: 30,
            codepage: Some(crate::encoding::CP_UTF8),
        }
    }
}

impl SessionConfig {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::default(),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(config) = Self::from_toml(&content) {
                return config;
            }
        }
        Self::default()
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }

    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        let home = std::env::var_os("USERPROFILE")
            .or_else(|| std::env::var_os("HOME"))
            .map(PathBuf::from)?;
        Some(home.join(".wpty").join("config.toml"))
    }
}
