use crate::core::errors::{BulkError, Result};
use serde::{Deserialize, Serialize};

/// Prefix reserved for control flags in the directive query
pub const CONTROL_PREFIX: char = '_';

/// Route registration details handed to the host server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_notes")]
    pub notes: String,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            description: default_description(),
            notes: default_notes(),
        }
    }
}

/// Configuration for bulk request execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Route path the host mounts the bulk endpoint on
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub route: RouteConfig,
    /// Maximum number of elements an `each` request dispatches (default: 10)
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: usize,
    /// Worker pool size for `each` requests (default: 3)
    #[serde(default = "default_fan_out_concurrency")]
    pub fan_out_concurrency: usize,
    /// Control key that turns on debug metadata
    #[serde(default = "default_debug_key")]
    pub debug_key: String,
}

fn default_path() -> String {
    "/bulk".to_string()
}

fn default_description() -> String {
    "Bulk request".to_string()
}

fn default_notes() -> String {
    "Performs multiple requests".to_string()
}

fn default_iteration_limit() -> usize {
    10
}

fn default_fan_out_concurrency() -> usize {
    3
}

fn default_debug_key() -> String {
    "_debug".to_string()
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            route: RouteConfig::default(),
            iteration_limit: default_iteration_limit(),
            fan_out_concurrency: default_fan_out_concurrency(),
            debug_key: default_debug_key(),
        }
    }
}

impl BulkConfig {
    /// Validates configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(BulkError::configuration(format!(
                "path must start with '/', got \"{}\"",
                self.path
            )));
        }
        if self.iteration_limit == 0 {
            return Err(BulkError::configuration(
                "iteration_limit must be greater than 0",
            ));
        }
        if self.fan_out_concurrency == 0 {
            return Err(BulkError::configuration(
                "fan_out_concurrency must be greater than 0",
            ));
        }
        if !self.debug_key.starts_with(CONTROL_PREFIX) {
            return Err(BulkError::configuration(format!(
                "debug_key must start with '{}', got \"{}\"",
                CONTROL_PREFIX, self.debug_key
            )));
        }
        Ok(())
    }

    /// Load and validate a configuration from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_iteration_limit(mut self, limit: usize) -> Self {
        self.iteration_limit = limit;
        self
    }

    pub fn with_fan_out_concurrency(mut self, workers: usize) -> Self {
        self.fan_out_concurrency = workers;
        self
    }
}
