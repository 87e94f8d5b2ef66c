//! Configuration loading and persistence.

use super::{AlgorithmPreference, BusKind, Config, LogLevel};
use crate::env;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::Path;

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to the default path.
    pub fn save_default(&self) -> Result<(), ConfigError> {
        let path = paths::config_file()?;
        self.save(&path)
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 doesn't have a serializer, so we use serde_json with pretty print
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        // 1. Bus name
        let bus_name = &self.service.bus_name;
        if bus_name.is_empty() {
            errors.push("Service bus_name cannot be empty".to_string());
        } else if !bus_name.starts_with(':') && !bus_name.contains('.') {
            errors.push(format!(
                "Invalid bus name '{}', expected a dotted well-known name",
                bus_name
            ));
        }

        // 2. Object path
        if !is_object_path(&self.service.object_path) {
            errors.push(format!(
                "Invalid service object_path '{}'",
                self.service.object_path
            ));
        }

        // 3. Bus address, when given, must name a transport
        if let Some(address) = &self.service.address {
            if !address.contains(':') || address.trim().len() != address.len() {
                errors.push(format!(
                    "Invalid service address '{}', expected a D-Bus address such as unix:path=...",
                    address
                ));
            }
        }

        // 4. Window id, when given, must not be blank
        if let Some(window_id) = &self.prompt.window_id {
            if window_id.trim().is_empty() {
                errors.push("Prompt window_id must not be blank".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }

    /// Apply `SESAME_*` environment overrides on top of this configuration.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(name) = env::get_var(env::vars::SESAME_BUS_NAME) {
            self.service.bus_name = name;
        }

        if let Some(bus) = env::get_var(env::vars::SESAME_BUS) {
            self.service.bus = bus.parse::<BusKind>().map_err(ConfigError::Validation)?;
        }

        if let Some(address) = env::get_var(env::vars::SESAME_BUS_ADDRESS) {
            self.service.address = Some(address);
        }

        if let Some(algorithm) = env::get_var(env::vars::SESAME_SESSION_ALGORITHM) {
            self.session.algorithm = algorithm
                .parse::<AlgorithmPreference>()
                .map_err(ConfigError::Validation)?;
        }

        if let Some(window_id) = env::get_var(env::vars::SESAME_WINDOW_ID) {
            self.prompt.window_id = Some(window_id);
        }

        if let Some(level) = env::get_var(env::vars::SESAME_LOG_LEVEL) {
            self.logging.level = level.parse::<LogLevel>().map_err(ConfigError::Validation)?;
        }

        Ok(())
    }

    /// Load configuration from the default path, falling back to defaults if no file exists.
    ///
    /// Environment overrides are applied in both cases.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let mut config = match Self::load_default() {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }
}

fn is_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|segment| {
        !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

/// Configuration builder for creating configs programmatically.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new config builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service bus name.
    pub fn bus_name(mut self, name: impl Into<String>) -> Self {
        self.config.service.bus_name = name.into();
        self
    }

    /// Set the standard bus to connect to.
    pub fn bus(mut self, bus: BusKind) -> Self {
        self.config.service.bus = bus;
        self
    }

    /// Connect to an explicit D-Bus address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.service.address = Some(address.into());
        self
    }

    /// Set the session algorithm preference.
    pub fn algorithm(mut self, algorithm: AlgorithmPreference) -> Self {
        self.config.session.algorithm = algorithm;
        self
    }

    /// Set the parent window handle for prompts.
    pub fn window_id(mut self, window_id: impl Into<String>) -> Self {
        self.config.prompt.window_id = Some(window_id.into());
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}
