//! Persistent inputs for the host: the TOML config file and the JSON schema.

pub mod config;

pub use config::{load_config, load_schema, ConfigError, HostConfig};
