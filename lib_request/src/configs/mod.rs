//! # Configuration Modules
//!
//! Layered configuration (defaults, JSON file, environment) for the
//! dispatcher and its HTTP transport.

/// Loading and merging of `DispatchConfig`.
pub mod config_dispatch;

pub use config_dispatch::{load_config, ConfigError, DispatchConfig};
