//! Configuration file loading for runbox
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};
use crate::types::SpecError;

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = SpecError::check_timeout(self.default_timeout) {
            return Err(ConfigError::Invalid(format!("default_timeout: {e}")));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "pool_size must be greater than zero".to_string(),
            ));
        }
        if self.identity_offset.checked_add(self.pool_size).is_none() {
            return Err(ConfigError::Invalid(format!(
                "identity_offset {} leaves no room for {} agents",
                self.identity_offset, self.pool_size
            )));
        }
        if Duration::try_from_secs_f64(self.kill_grace).is_err() {
            return Err(ConfigError::Invalid(format!(
                "kill_grace must be a representable non-negative number of seconds, got {}",
                self.kill_grace
            )));
        }
        if let Some(max_wait) = self.max_wait
            && Duration::try_from_secs_f64(max_wait).is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "max_wait must be a representable non-negative number of seconds, got {max_wait}"
            )));
        }

        for (id, lang) in &self.languages {
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.extension.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty extension"
                )));
            }
            if let Some(ref run) = lang.run
                && run.is_empty()
            {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
        }

        // Unknown ids and duplicate extensions
        self.registry()?;

        Ok(())
    }
}
