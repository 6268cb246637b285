//! Configuration loading and validation.

mod types;

pub use types::{Config, MigrationOptions, ProjectConfig};

use crate::error::{MigrateError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;

        if self.source.project_id == self.destination.project_id
            && self.source.endpoint == self.destination.endpoint
        {
            return Err(MigrateError::Config(
                "source and destination refer to the same project".to_string(),
            ));
        }

        Ok(())
    }
}

impl ProjectConfig {
    fn validate(&self, which: &str) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(MigrateError::Config(format!("{}.endpoint is required", which)));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(MigrateError::Config(format!(
                "{}.endpoint must be an http(s) URL: {}",
                which, self.endpoint
            )));
        }
        if self.project_id.is_empty() {
            return Err(MigrateError::Config(format!("{}.project_id is required", which)));
        }
        if self.api_key.is_empty() {
            return Err(MigrateError::Config(format!("{}.api_key is required", which)));
        }
        Ok(())
    }
}
