//! Device router host application entry point.
//!
//! Loads the device schema, dials the guest VM, and answers the guest's
//! routing requests until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! devroute-host --schema-json <PATH> (--guest-cid <CID> | --tcp <IP:PORT>) [OPTIONS]
//!
//! Options:
//!   --schema-json <PATH>   JSON file with devices and current mounts (required)
//!   --guest-cid   <CID>    vsock context id of the guest VM
//!   --guest-port  <PORT>   vsock port the guest listens on [default: 7000]
//!   --tcp         <ADDR>   dial the guest over TCP instead of vsock
//!   --ack-delay   <SECS>   pause before every ack (testing aid) [default: 0]
//!   --config      <PATH>   TOML config file [default: ~/.config/devroute/host.toml]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Description             |
//! |-------------------------|-------------------------|
//! | `DEVROUTE_SCHEMA_JSON`  | `--schema-json`         |
//! | `DEVROUTE_GUEST_CID`    | `--guest-cid`           |
//! | `DEVROUTE_GUEST_PORT`   | `--guest-port`          |
//! | `DEVROUTE_GUEST_TCP`    | `--tcp`                 |
//! | `DEVROUTE_HOST_CONFIG`  | `--config`              |
//!
//! CLI values take precedence over the config file.  If neither the CLI nor
//! the config file names a guest address the host exits with an error.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use devroute_core::{StreamAddress, DEFAULT_VSOCK_PORT};
use tracing::info;
use tracing_subscriber::EnvFilter;

use devroute_host::application::host_session::{HostSession, MessageSink};
use devroute_host::infrastructure::network::{DialerConfig, DialerEndpoint};
use devroute_host::infrastructure::storage::{load_config, load_schema, HostConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Device router host.
///
/// Dials the guest VM, pushes the device schema, and authorizes the guest's
/// requests to move devices between VMs.
#[derive(Debug, Parser)]
#[command(
    name = "devroute-host",
    about = "Host side of the device router: authorizes device moves requested by the guest",
    version
)]
struct Cli {
    /// JSON schema file with `devices` and `current-mount`.
    #[arg(long, env = "DEVROUTE_SCHEMA_JSON")]
    schema_json: PathBuf,

    /// vsock context id of the guest VM.
    #[arg(long, env = "DEVROUTE_GUEST_CID", conflicts_with = "tcp")]
    guest_cid: Option<u32>,

    /// vsock port the guest listens on.
    #[arg(long, default_value_t = DEFAULT_VSOCK_PORT, env = "DEVROUTE_GUEST_PORT")]
    guest_port: u32,

    /// Dial the guest over TCP at this address instead of vsock.
    #[arg(long, env = "DEVROUTE_GUEST_TCP")]
    tcp: Option<SocketAddr>,

    /// Seconds to wait before sending each ack.
    ///
    /// Useful for watching the guest's pending state by hand.
    #[arg(long)]
    ack_delay: Option<f64>,

    /// TOML config file.
    #[arg(long, env = "DEVROUTE_HOST_CONFIG")]
    config: Option<PathBuf>,
}

/// Fully resolved runtime settings.
#[derive(Debug)]
struct HostSettings {
    schema_json: PathBuf,
    dialer: DialerConfig,
    ack_delay: Duration,
}

impl Cli {
    /// Merges the CLI arguments over `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if no guest address is given anywhere, if the config
    /// file's address does not parse, or if `--ack-delay` is negative.
    fn into_settings(self, config: &HostConfig) -> anyhow::Result<HostSettings> {
        let guest_addr = if let Some(addr) = self.tcp {
            StreamAddress::Tcp(addr)
        } else if let Some(cid) = self.guest_cid {
            StreamAddress::Vsock {
                cid,
                port: self.guest_port,
            }
        } else if let Some(text) = &config.network.guest_address {
            text.parse()
                .with_context(|| format!("invalid guest_address in config: '{text}'"))?
        } else {
            bail!("no guest address: pass --guest-cid or --tcp, or set network.guest_address");
        };

        let ack_delay = match self.ack_delay {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid --ack-delay: {secs}"))?,
            None => Duration::from_millis(config.host.ack_delay_ms),
        };

        Ok(HostSettings {
            schema_json: self.schema_json,
            dialer: DialerConfig {
                guest_addr,
                connect_timeout: config.network.connect_timeout(),
                reconnect_interval: config.network.reconnect_interval(),
            },
            ack_delay,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("failed to load host config")?;

    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level)),
        )
        .init();

    let settings = cli.into_settings(&config)?;

    // An unusable schema is fatal before any connection is attempted.
    let schema = load_schema(&settings.schema_json)
        .with_context(|| format!("failed to load schema {}", settings.schema_json.display()))?;

    info!(
        "device router host starting: guest={}, devices={}, ack_delay={:?}",
        settings.dialer.guest_addr,
        schema.devices.len(),
        settings.ack_delay
    );

    let running = Arc::new(AtomicBool::new(true));

    let dialer = Arc::new(DialerEndpoint::new(settings.dialer));
    let events = Arc::clone(&dialer).start(Arc::clone(&running));
    let sink: Arc<dyn MessageSink> = dialer;
    let session = HostSession::new(Arc::new(schema), sink, settings.ack_delay);
    tokio::spawn(session.run(events));

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("device router host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
