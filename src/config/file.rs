//! Server configuration file
//!
//! Optional TOML file supplying defaults for anything not given on the command line.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::OriginPolicy;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Contents of a server config file
///
/// Every field is optional; missing values fall back to command line flags
/// or built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Address to bind to
    pub bind: Option<String>,
    /// Port to listen on
    pub port: Option<u16>,
    /// Origins allowed to connect; absent or empty allows all
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Origin policy described by this file
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::from_origins(self.allowed_origins.iter().cloned())
    }
}
