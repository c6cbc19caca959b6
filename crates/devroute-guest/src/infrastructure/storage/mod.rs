//! Persistent inputs for the guest: the TOML config file.

pub mod config;

pub use config::{load_config, ConfigError, GuestConfig};
