//! Device router guest application entry point.
//!
//! Listens for the host, keeps the device registry in sync with the host's
//! snapshots, and turns console commands into routing requests until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! devroute-guest [--port <PORT> | --tcp <IP:PORT> | --test-file <PATH>] [OPTIONS]
//!
//! Options:
//!   --port           <PORT>  listen on this vsock port for any CID
//!   --tcp            <ADDR>  listen on a TCP address instead of vsock
//!   --test-file      <PATH>  play the host from a JSON file (no network)
//!   --ack-timeout-ms <MS>    how long to wait for an ack [default: 6000]
//!   --config         <PATH>  TOML config file [default: ~/.config/devroute/guest.toml]
//! ```
//!
//! Without a transport flag the guest listens on `network.listen_address`
//! from the config file (`vsock:any:7000` by default).
//!
//! # Environment variable overrides
//!
//! | Variable                     | Description   |
//! |------------------------------|---------------|
//! | `DEVROUTE_GUEST_LISTEN_PORT` | `--port`      |
//! | `DEVROUTE_GUEST_LISTEN_TCP`  | `--tcp`       |
//! | `DEVROUTE_TEST_FILE`         | `--test-file` |
//! | `DEVROUTE_GUEST_CONFIG`      | `--config`    |
//!
//! CLI values take precedence over the config file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use devroute_core::StreamAddress;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use devroute_guest::application::service::{GuestService, GuestTransport};
use devroute_guest::infrastructure::console;
use devroute_guest::infrastructure::file_test::{FileTestConfig, FileTestTransport};
use devroute_guest::infrastructure::network::{ListenerConfig, ListenerEndpoint};
use devroute_guest::infrastructure::storage::{load_config, GuestConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Device router guest.
///
/// Shows the devices the host announces and asks the host to move them
/// between VMs.
#[derive(Debug, Parser)]
#[command(
    name = "devroute-guest",
    about = "Guest side of the device router: requests device moves from the host",
    version
)]
struct Cli {
    /// Listen on this vsock port for any CID.
    #[arg(long, env = "DEVROUTE_GUEST_LISTEN_PORT", conflicts_with_all = ["tcp", "test_file"])]
    port: Option<u32>,

    /// Listen on this TCP address instead of vsock.
    #[arg(long, env = "DEVROUTE_GUEST_LISTEN_TCP", conflicts_with = "test_file")]
    tcp: Option<SocketAddr>,

    /// Use a JSON file as the host: snapshots come from the file and every
    /// request is approved at once.
    #[arg(long, env = "DEVROUTE_TEST_FILE")]
    test_file: Option<PathBuf>,

    /// Milliseconds to wait for an ack before rolling a request back.
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// TOML config file.
    #[arg(long, env = "DEVROUTE_GUEST_CONFIG")]
    config: Option<PathBuf>,
}

/// Which transport the guest runs on.
#[derive(Debug)]
enum TransportChoice {
    Listen(ListenerConfig),
    File(FileTestConfig),
}

/// Fully resolved runtime settings.
#[derive(Debug)]
struct GuestSettings {
    transport: TransportChoice,
    ack_timeout: Duration,
}

impl Cli {
    /// Merges the CLI arguments over `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured listen address does not parse or
    /// the ack timeout is zero.
    fn into_settings(self, config: &GuestConfig) -> anyhow::Result<GuestSettings> {
        let transport = if let Some(path) = self.test_file {
            TransportChoice::File(FileTestConfig {
                path,
                poll_interval: config.test_mode.poll_interval(),
                write_suppress: config.test_mode.write_suppress(),
            })
        } else {
            let address = if let Some(addr) = self.tcp {
                StreamAddress::Tcp(addr)
            } else if let Some(port) = self.port {
                StreamAddress::vsock_any(port)
            } else {
                let text = &config.network.listen_address;
                text.parse()
                    .with_context(|| format!("invalid listen_address in config: '{text}'"))?
            };
            TransportChoice::Listen(ListenerConfig {
                address,
                rebind_backoff: config.network.rebind_backoff(),
            })
        };

        let ack_timeout = self
            .ack_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.guest.ack_timeout());
        if ack_timeout.is_zero() {
            bail!("the ack timeout must be greater than zero");
        }

        Ok(GuestSettings {
            transport,
            ack_timeout,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("failed to load guest config")?;

    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.guest.log_level)),
        )
        .init();

    let settings = cli.into_settings(&config)?;

    let transport: Arc<dyn GuestTransport> = match settings.transport {
        TransportChoice::Listen(listener) => {
            info!("device router guest starting: listen={}", listener.address);
            Arc::new(ListenerEndpoint::new(listener))
        }
        TransportChoice::File(file) => {
            info!("device router guest starting: test file {}", file.path.display());
            let path = file.path.clone();
            Arc::new(
                FileTestTransport::open(file)
                    .with_context(|| format!("failed to open test file {}", path.display()))?,
            )
        }
    };

    let running = Arc::new(AtomicBool::new(true));

    let transport_events = Arc::clone(&transport).start(Arc::clone(&running));
    let (service, handle, mut events) = GuestService::new(transport, settings.ack_timeout);
    tokio::spawn(service.run(transport_events));

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            console::log_event(&event);
        }
    });

    tokio::spawn(async move {
        let lines = console::spawn_stdin_reader();
        if let Err(e) = console::run(handle, lines, tokio::io::stdout()).await {
            error!("console stopped: {e}");
        }
    });

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("device router guest stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["devroute-guest"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    fn listen_address(settings: &GuestSettings) -> StreamAddress {
        match &settings.transport {
            TransportChoice::Listen(cfg) => cfg.address,
            other => panic!("expected a listener, got {other:?}"),
        }
    }

    #[test]
    fn test_default_settings_listen_on_vsock_any_7000() {
        // Arrange / Act
        let settings = parse(&[]).into_settings(&GuestConfig::default()).unwrap();

        // Assert
        assert_eq!(listen_address(&settings), StreamAddress::vsock_any(7000));
        assert_eq!(settings.ack_timeout, Duration::from_secs(6));
    }

    #[test]
    fn test_port_flag_listens_on_vsock_port() {
        let settings = parse(&["--port", "7100"])
            .into_settings(&GuestConfig::default())
            .unwrap();
        assert_eq!(listen_address(&settings), StreamAddress::vsock_any(7100));
    }

    #[test]
    fn test_tcp_flag_listens_on_tcp() {
        let settings = parse(&["--tcp", "127.0.0.1:7000"])
            .into_settings(&GuestConfig::default())
            .unwrap();
        assert_eq!(listen_address(&settings).to_string(), "tcp:127.0.0.1:7000");
    }

    #[test]
    fn test_transport_flags_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["devroute-guest", "--port", "1", "--tcp", "127.0.0.1:1"]).is_err());
        assert!(Cli::try_parse_from(["devroute-guest", "--tcp", "127.0.0.1:1", "--test-file", "x.json"]).is_err());
        assert!(Cli::try_parse_from(["devroute-guest", "--port", "1", "--test-file", "x.json"]).is_err());
    }

    #[test]
    fn test_test_file_uses_config_timings() {
        // Arrange
        let mut config = GuestConfig::default();
        config.test_mode.poll_interval_ms = 50;

        // Act
        let settings = parse(&["--test-file", "devices.json"])
            .into_settings(&config)
            .unwrap();

        // Assert
        let TransportChoice::File(file) = settings.transport else {
            panic!("expected the file transport");
        };
        assert_eq!(file.path, PathBuf::from("devices.json"));
        assert_eq!(file.poll_interval, Duration::from_millis(50));
        assert_eq!(file.write_suppress, Duration::from_millis(500));
    }

    #[test]
    fn test_ack_timeout_flag_overrides_config() {
        let mut config = GuestConfig::default();
        config.guest.ack_timeout_ms = 9000;

        let settings = parse(&["--ack-timeout-ms", "250"]).into_settings(&config).unwrap();

        assert_eq!(settings.ack_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_ack_timeout_is_rejected() {
        assert!(parse(&["--ack-timeout-ms", "0"])
            .into_settings(&GuestConfig::default())
            .is_err());
    }

    #[test]
    fn test_config_listen_address_is_used_without_flags() {
        let mut config = GuestConfig::default();
        config.network.listen_address = "tcp:0.0.0.0:7200".to_string();
        config.network.rebind_backoff_ms = 25;

        let settings = parse(&[]).into_settings(&config).unwrap();

        let TransportChoice::Listen(listener) = settings.transport else {
            panic!("expected a listener");
        };
        assert_eq!(listener.address.to_string(), "tcp:0.0.0.0:7200");
        assert_eq!(listener.rebind_backoff, Duration::from_millis(25));
    }

    #[test]
    fn test_unparsable_config_address_is_an_error() {
        let mut config = GuestConfig::default();
        config.network.listen_address = "somewhere".to_string();
        assert!(parse(&[]).into_settings(&config).is_err());
    }
}
