//! wiregrid-core — types shared by every WireGrid crate.
//!
//! - [`Capabilities`] and subset matching
//! - [`NodeClass`], the quota-accounting tag derived from capabilities
//! - [`GridConfig`], the daemon's TOML configuration
//! - Go-style duration strings (`"15m"`, `"1h30m"`, `"500ms"`)

pub mod config;
pub mod duration;
pub mod types;

pub use config::{
    ConfigError, ConfigResult, DbConfig, GridConfig, GridSection, LoggerConfig, MetricsConfig,
    StaticNode, Strategy,
};
pub use duration::parse_duration;
pub use types::*;
