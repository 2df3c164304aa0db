//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::core::TableRef;
use crate::error::{LoadError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Table entries matching `names`, in configuration order. All entries when
    /// `names` is empty. An unknown name is a configuration error.
    pub fn select_tables(&self, names: &[String]) -> Result<Vec<&TableConfig>> {
        if names.is_empty() {
            return Ok(self.tables.iter().collect());
        }
        let key = |name: &str| TableRef::new(name).resolve().to_string();
        let wanted: Vec<String> = names.iter().map(|n| key(n)).collect();

        for (name, resolved) in names.iter().zip(&wanted) {
            if !self.tables.iter().any(|t| &key(&t.table) == resolved) {
                return Err(LoadError::Config(format!(
                    "table {} is not in the configuration",
                    name
                )));
            }
        }
        Ok(self
            .tables
            .iter()
            .filter(|t| wanted.contains(&key(&t.table)))
            .collect())
    }
}
