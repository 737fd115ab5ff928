//! Evaluator settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Tunables for location expression evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Nesting limit for DW_OP_call*, frame-base and entry-value evaluation
    pub max_recursion_depth: u32,
    /// Log every call-site parameter lookup done for DW_OP_entry_value
    pub entry_values_debug: bool,
    /// Satisfy reads of the object being described from its snapshot bytes
    pub prefer_object_snapshot: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 256,
            entry_values_debug: false,
            prefer_object_snapshot: true,
        }
    }
}

/// On-disk layout, settings live under `[evaluator]`
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    evaluator: EvalConfig,
}

impl EvalConfig {
    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).context("Failed to parse evaluator configuration")?;
        file.evaluator.validate()?;
        Ok(file.evaluator)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        info!("Loaded evaluator configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_recursion_depth == 0 {
            anyhow::bail!("max_recursion_depth must be at least 1");
        }
        Ok(())
    }
}
