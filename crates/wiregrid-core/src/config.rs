//! gridd configuration file (`wiregrid.toml`).
//!
//! Loaded once at startup and shared read-only afterwards.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration;
use crate::types::{Capabilities, NodeClass};

/// Errors raised while loading or validating the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("empty configuration file path")]
    EmptyPath,

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("duplicate strategy for node class {0}")]
    DuplicateStrategy(NodeClass),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("static node has an empty address")]
    EmptyNodeAddress,
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub db: DbConfig,
    pub grid: GridSection,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// tracing level directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path of the redb file, or `memory` for an ephemeral store.
    #[serde(default = "default_db_connection")]
    pub connection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSection {
    pub port: u16,
    /// Max lifetime of a reservation that has a confirmed session.
    #[serde(with = "duration::serde_str")]
    pub busy_node_duration: Duration,
    /// Max lifetime of a reservation still waiting for its session.
    #[serde(with = "duration::serde_str")]
    pub reserved_node_duration: Duration,
    #[serde(default = "default_sweep_interval", with = "duration::serde_str")]
    pub sweep_interval: Duration,
    /// Upper bound on a whole create-session call, retries included.
    #[serde(default = "default_session_create_timeout", with = "duration::serde_str")]
    pub session_create_timeout: Duration,
    #[serde(default)]
    pub strategy_list: Vec<Strategy>,
    /// Nodes registered at startup in addition to persisted ones.
    #[serde(default)]
    pub nodes: Vec<StaticNode>,
}

/// Quota rule: at most `limit` simultaneously reserved nodes of `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(rename = "type")]
    pub node_class: NodeClass,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticNode {
    pub address: String,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_connection() -> String {
    "memory".to_string()
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_session_create_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            connection: default_db_connection(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            path: default_metrics_path(),
        }
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: GridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for strategy in &self.grid.strategy_list {
            if !seen.insert(strategy.node_class) {
                return Err(ConfigError::DuplicateStrategy(strategy.node_class));
            }
        }
        if self.grid.busy_node_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("busy_node_duration"));
        }
        if self.grid.reserved_node_duration.is_zero() {
            return Err(ConfigError::ZeroDuration("reserved_node_duration"));
        }
        if self.grid.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep_interval"));
        }
        if self.grid.nodes.iter().any(|n| n.address.trim().is_empty()) {
            return Err(ConfigError::EmptyNodeAddress);
        }
        Ok(())
    }

    /// A minimal config suitable as a starting point for operators.
    pub fn scaffold() -> Self {
        GridConfig {
            logger: LoggerConfig::default(),
            db: DbConfig {
                connection: "/var/lib/wiregrid/grid.redb".to_string(),
            },
            grid: GridSection {
                port: 4444,
                busy_node_duration: Duration::from_secs(15 * 60),
                reserved_node_duration: Duration::from_secs(5 * 60),
                sweep_interval: default_sweep_interval(),
                session_create_timeout: default_session_create_timeout(),
                strategy_list: vec![
                    Strategy {
                        node_class: NodeClass::Default,
                        limit: 100,
                    },
                    Strategy {
                        node_class: NodeClass::Wda,
                        limit: 10,
                    },
                ],
                nodes: Vec::new(),
            },
            metrics: MetricsConfig {
                enable: true,
                path: default_metrics_path(),
            },
        }
    }
}
