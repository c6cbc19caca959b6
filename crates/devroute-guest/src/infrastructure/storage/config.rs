//! TOML-based configuration for the guest.
//!
//! Read from `$XDG_CONFIG_HOME/devroute/guest.toml` (or
//! `~/.config/devroute/guest.toml`) unless `--config` names another path:
//!
//! ```toml
//! [guest]
//! log_level = "info"
//! ack_timeout_ms = 6000
//!
//! [network]
//! listen_address = "vsock:any:7000"
//! rebind_backoff_ms = 1000
//!
//! [test_mode]
//! poll_interval_ms = 1000
//! write_suppress_ms = 500
//! ```
//!
//! Every field is optional; a missing file at the default location means
//! "all defaults".

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level guest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GuestConfig {
    #[serde(default)]
    pub guest: GuestSection,
    #[serde(default)]
    pub network: ListenConfig,
    #[serde(default)]
    pub test_mode: TestModeConfig,
}

/// General guest behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestSection {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long a request may wait for its ack before it is rolled back.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

/// Where the guest listens for the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenConfig {
    /// Listener address, e.g. `"vsock:any:7000"` or `"tcp:0.0.0.0:7000"`.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Pause before rebinding after a bind or accept failure.
    #[serde(default = "default_rebind_backoff_ms")]
    pub rebind_backoff_ms: u64,
}

/// Timings of the file-backed test transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestModeConfig {
    /// How often the test file's modification time is checked.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long change detection stays off after the guest saves.
    #[serde(default = "default_write_suppress_ms")]
    pub write_suppress_ms: u64,
}

impl GuestSection {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl ListenConfig {
    pub fn rebind_backoff(&self) -> Duration {
        Duration::from_millis(self.rebind_backoff_ms)
    }
}

impl TestModeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn write_suppress(&self) -> Duration {
        Duration::from_millis(self.write_suppress_ms)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_ack_timeout_ms() -> u64 {
    6000
}
fn default_listen_address() -> String {
    "vsock:any:7000".to_string()
}
fn default_rebind_backoff_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_write_suppress_ms() -> u64 {
    500
}

impl Default for GuestSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            rebind_backoff_ms: default_rebind_backoff_ms(),
        }
    }
}

impl Default for TestModeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            write_suppress_ms: default_write_suppress_ms(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the default config file path, if a config directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("devroute").join("guest.toml"))
}

/// Loads the guest config.
///
/// With `explicit = Some(path)` the file must exist.  Otherwise the default
/// location is tried and a missing file yields [`GuestConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(explicit: Option<&Path>) -> Result<GuestConfig, ConfigError> {
    match explicit {
        Some(path) => read_config(path, false),
        None => match default_config_path() {
            Some(path) => read_config(&path, true),
            None => Ok(GuestConfig::default()),
        },
    }
}

fn read_config(path: &Path, missing_ok: bool) -> Result<GuestConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if missing_ok && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(GuestConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
