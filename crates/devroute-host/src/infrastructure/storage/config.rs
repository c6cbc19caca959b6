//! TOML-based configuration and JSON schema loading for the host.
//!
//! The config file lives at `$XDG_CONFIG_HOME/devroute/host.toml`
//! (or `~/.config/devroute/host.toml`) unless `--config` names another path:
//!
//! ```toml
//! [host]
//! log_level = "info"
//! ack_delay_ms = 0
//!
//! [network]
//! guest_address = "vsock:101:7000"
//! connect_timeout_ms = 3000
//! reconnect_interval_ms = 1000
//! ```
//!
//! Every field is optional.  Fields annotated with
//! `#[serde(default = "some_fn")]` use the return value of `some_fn()` when
//! absent, and a missing file at the default location means "all defaults".
//!
//! The schema file is a separate JSON document (see
//! [`devroute_core::domain::schema`]) and is always required.

use std::path::{Path, PathBuf};
use std::time::Duration;

use devroute_core::{Schema, SchemaError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration and schema loading.
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

    /// The schema file is malformed or has the wrong shape.
    #[error("invalid schema in {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General host behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Artificial delay before every ack, in milliseconds.
    #[serde(default)]
    pub ack_delay_ms: u64,
}

/// Where and how to reach the guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Guest listener address, e.g. `"vsock:101:7000"`.  The CLI overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_address: Option<String>,
    /// Bound on a single connection attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Pause between connection attempts.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_reconnect_interval_ms() -> u64 {
    1000
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ack_delay_ms: 0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            guest_address: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Resolves the default config file path, if a config directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("devroute").join("host.toml"))
}

/// Loads the host config.
///
/// With `explicit = Some(path)` the file must exist.  Otherwise the default
/// location is tried and a missing file yields [`HostConfig::default()`].
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(explicit: Option<&Path>) -> Result<HostConfig, ConfigError> {
    match explicit {
        Some(path) => read_config(path, false),
        None => match default_config_path() {
            Some(path) => read_config(&path, true),
            None => Ok(HostConfig::default()),
        },
    }
}

fn read_config(path: &Path, missing_ok: bool) -> Result<HostConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if missing_ok && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(HostConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Reads and normalizes the host schema from a JSON file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Schema`] if it is not a valid schema document.
pub fn load_schema(path: &Path) -> Result<Schema, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Schema::from_json_str(&text).map_err(|source| ConfigError::Schema {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_host_config_default_timings() {
        // Arrange / Act
        let cfg = HostConfig::default();

        // Assert
        assert_eq!(cfg.network.connect_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.network.reconnect_interval(), Duration::from_secs(1));
        assert_eq!(cfg.host.ack_delay_ms, 0);
        assert_eq!(cfg.host.log_level, "info");
        assert!(cfg.network.guest_address.is_none());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: HostConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn test_partial_network_section_overrides_only_named_fields() {
        // Arrange
        let toml_str = r#"
[network]
guest_address = "vsock:101:7000"
connect_timeout_ms = 500
"#;

        // Act
        let cfg: HostConfig = toml::from_str(toml_str).unwrap();

        // Assert
        assert_eq!(cfg.network.guest_address.as_deref(), Some("vsock:101:7000"));
        assert_eq!(cfg.network.connect_timeout_ms, 500);
        assert_eq!(cfg.network.reconnect_interval_ms, 1000);
    }

    #[test]
    fn test_load_config_reads_explicit_file() {
        let file = write_temp("[host]\nack_delay_ms = 250\n", ".toml");

        let cfg = load_config(Some(file.path())).unwrap();

        assert_eq!(cfg.host.ack_delay_ms, 250);
    }

    #[test]
    fn test_load_config_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_read_config_missing_default_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = read_config(&dir.path().join("host.toml"), true).unwrap();
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn test_load_config_invalid_toml_returns_parse_error() {
        let file = write_temp("[[[ not valid toml", ".toml");
        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_schema_reads_devices() {
        // Arrange
        let file = write_temp(
            r#"{"devices":{"1:2":{"permitted_vms":["vmA"]}},"current-mount":{}}"#,
            ".json",
        );

        // Act
        let schema = load_schema(file.path()).unwrap();

        // Assert
        assert_eq!(schema.permitted_targets("1:2"), Some(&["vmA".to_string()][..]));
    }

    #[test]
    fn test_load_schema_rejects_wrong_shape() {
        let file = write_temp(r#"{"devices":[]}"#, ".json");
        let result = load_schema(file.path());
        assert!(matches!(
            result,
            Err(ConfigError::Schema {
                source: SchemaError::InvalidShape(_),
                ..
            })
        ));
    }

    #[test]
    fn test_load_schema_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_schema(&dir.path().join("schema.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_default_config_path_ends_with_host_toml() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("devroute/host.toml"), "got {path:?}");
        }
    }
}
