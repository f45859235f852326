//! Runtime options
//!
//! Options are read from the `[invoke]` table of a TOML file:
//!
//! ```toml
//! [invoke]
//! cache_as_type = true
//! trace_conversions = false
//! ```
//!
//! Missing keys (or a missing table) take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunables for a [`crate::Runtime`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Remember the most recent `as_type` conversion per handle
    pub cache_as_type: bool,

    /// Emit a trace event for every slot conversion at call time
    pub trace_conversions: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            cache_as_type: true,
            trace_conversions: false,
        }
    }
}

/// File layout: options live under `[invoke]`
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    invoke: RuntimeOptions,
}

impl RuntimeOptions {
    /// Parse options from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.invoke)
    }

    /// Load options from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
