//! Daemon settings

use crate::core::bus::{glob_pattern, RedisBus, EVENTS_PATTERN};
use crate::core::collector::CollectorConfig;
use crate::core::directory::NodeEntry;
use crate::core::relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {path}: {source}")]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for the config schema
    #[error("Cannot parse {path}: {source}")]
    Parse {
        /// Config file
        path: PathBuf,
        /// Underlying error
        source: toml::de::Error,
    },

    /// Values are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Lab multiplexer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// State collector settings
    pub collector: CollectorConfig,
    /// Telnet relay settings
    pub relay: RelayConfig,
    /// Event bus settings
    pub bus: BusConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Static node directory
    pub nodes: Vec<NodeEntry>,
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Subscription pattern
    pub pattern: String,
    /// Messages buffered per subscriber of the in-process bus
    pub capacity: usize,
    /// Redis server shared with the web application, e.g.
    /// `redis://127.0.0.1:6379/0`
    pub url: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pattern: EVENTS_PATTERN.to_string(),
            capacity: 1024,
            url: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines
    pub json: bool,
    /// Also write daily log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

impl LabConfig {
    /// Load config from file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Load from the default location
    pub fn load_default() -> Result<Self, ConfigError> {
        match super::default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate config text
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.collector.port == 0 {
            return invalid("collector.port must not be 0".into());
        }
        if self.collector.max_line_length == 0 {
            return invalid("collector.max_line_length must not be 0".into());
        }
        if self.collector.outbound_queue == 0 || self.relay.outbound_queue == 0 {
            return invalid("outbound_queue must not be 0".into());
        }
        if self.relay.connect_timeout_ms == 0 {
            return invalid("relay.connect_timeout_ms must not be 0".into());
        }
        if self.bus.capacity == 0 {
            return invalid("bus.capacity must not be 0".into());
        }
        if let Err(e) = glob_pattern(&self.bus.pattern) {
            return invalid(e.to_string());
        }
        if let Some(url) = &self.bus.url {
            if let Err(e) = RedisBus::open(url) {
                return invalid(format!("bus.url: {}", e));
            }
        }

        let mut ids = HashSet::new();
        let mut uuids = HashSet::new();
        for node in &self.nodes {
            let record = node.record();
            if record.uuid.is_empty() {
                return invalid(format!("node {} has an empty uuid", node.id));
            }
            if !ids.insert(node.id) {
                return invalid(format!("duplicate node id {}", node.id));
            }
            if !uuids.insert(record.uuid.clone()) {
                return invalid(format!("duplicate node uuid {}", record.uuid));
            }
            if node.console.as_ref().is_some_and(|console| console.port == 0) {
                return invalid(format!("node {} has console port 0", node.id));
            }
        }

        Ok(())
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
