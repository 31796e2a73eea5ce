//! Processor configuration
//!
//! TOML-based configuration for message processor groups with environment
//! variable overrides for the lifecycle settings.

use mp_common::Destination;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub lifecycle: LifecycleConfig,
    #[serde(rename = "processor")]
    pub processors: Vec<ProcessorGroupConfig>,
}

/// Settings for starting and stopping processor services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long to wait for a service's start completion signal
    pub start_timeout_secs: u64,
    /// Stop already-started services when another service of the set fails to start
    pub stop_on_partial_start: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: 30,
            stop_on_partial_start: true,
        }
    }
}

impl LifecycleConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

/// One message processor group: a destination bound to a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorGroupConfig {
    /// Logical name; also the durable subscription name
    pub name: String,
    pub destination: Destination,
    /// Request a durable subscription (topics only)
    #[serde(default)]
    pub durable: bool,
    /// Message selector passed through to the transport
    #[serde(default)]
    pub selector: Option<String>,
    /// Number of independent consumers serving this group
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

fn default_concurrency() -> u32 {
    1
}

impl ProcessorGroupConfig {
    pub fn new(name: impl Into<String>, destination: Destination) -> Self {
        Self {
            name: name.into(),
            destination,
            durable: false,
            selector: None,
            concurrency: default_concurrency(),
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "processor name must not be empty".to_string(),
            ));
        }
        if self.destination.name().trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "processor {} has an empty destination name",
                self.name
            )));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationError(format!(
                "processor {} must have a concurrency of at least 1",
                self.name
            )));
        }
        if matches!(&self.selector, Some(s) if s.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "processor {} has an empty selector; omit it instead",
                self.name
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for processor in &self.processors {
            processor.validate()?;
            if !names.insert(processor.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate processor name: {}",
                    processor.name
                )));
            }
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Message processor configuration
# Environment variables override the lifecycle settings

[lifecycle]
start_timeout_secs = 30
stop_on_partial_start = true

[[processor]]
name = "orders"
destination = { kind = "queue", name = "/queues/orders" }
concurrency = 2

[[processor]]
name = "price-audit"
destination = { kind = "topic", name = "/topics/prices" }
durable = true
selector = "region = 'emea'"
"#
        .to_string()
    }
}
