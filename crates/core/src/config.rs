//! TOML-based configuration for ModelSync.
//!
//! Every section is optional; a missing section takes its defaults. Element
//! types declared here are registered on every model the coordinator
//! materializes.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::hub::DEFAULT_CHANNEL_CAPACITY;
use crate::model::{ElementType, SchemaRegistry};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Branch settings.
    #[serde(default)]
    pub branches: BranchConfig,

    /// Live listener settings.
    #[serde(default)]
    pub hub: HubConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Declared element types.
    #[serde(default)]
    pub element_types: Vec<ElementType>,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Branch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Name of the designated primary branch that everything commits to.
    #[serde(default = "default_primary")]
    pub primary: String,
}

fn default_primary() -> String {
    "public".into()
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
        }
    }
}

/// Publish/subscribe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-branch buffer size; listeners further behind lose the oldest
    /// operations.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.branches.primary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "branches.primary".into(),
                detail: "primary branch name must not be empty".into(),
            });
        }
        if self.hub.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hub.channel_capacity".into(),
                detail: "channel capacity must be > 0".into(),
            });
        }

        let mut seen = HashSet::new();
        for element_type in &self.element_types {
            if element_type.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "element_types.name".into(),
                    detail: "element type name must not be empty".into(),
                });
            }
            if !seen.insert(element_type.name.to_ascii_lowercase()) {
                return Err(ConfigError::InvalidValue {
                    field: "element_types.name".into(),
                    detail: format!("element type '{}' is declared twice", element_type.name),
                });
            }
            if element_type.properties.iter().any(|p| p.name.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("element_types.{}.properties.name", element_type.name),
                    detail: "property name must not be empty".into(),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// The declared element types as a lookup registry.
    pub fn schema(&self) -> SchemaRegistry {
        self.element_types.iter().cloned().collect()
    }
}
