//! Dialer endpoint: the host's connection to the guest.
//!
//! The guest listens; the host dials.  The dialer never gives up: every
//! failed attempt and every dropped stream is followed by a fixed pause and
//! another attempt, until the shared `running` flag is cleared.
//!
//! ```text
//! loop while running:
//!     connect (bounded by connect_timeout)
//!       ok  → store writer, emit Connected, read until EOF,
//!             clear writer, emit Disconnected
//!       err → emit Disconnected
//!     sleep reconnect_interval
//! ```
//!
//! Only one attempt is ever in flight, and only one stream is ever live.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use devroute_core::{ChannelError, Message, MessageReader, MessageWriter, StreamAddress};
use tokio::{
    sync::{mpsc, Mutex},
    time,
};
use tracing::{debug, info, warn};

use super::stream;
use crate::application::host_session::{MessageSink, NetworkEvent};

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default pause between connection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the dialer.
#[derive(Debug, Clone)]
pub struct DialerConfig {
    /// Address of the guest's listener.
    pub guest_addr: StreamAddress,
    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Pause after a failed attempt or a dropped stream.
    pub reconnect_interval: Duration,
}

impl DialerConfig {
    /// Configuration for `guest_addr` with the default timings.
    pub fn new(guest_addr: StreamAddress) -> Self {
        Self {
            guest_addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Manages the host's stream to the guest.
pub struct DialerEndpoint {
    config: DialerConfig,
    writer: Arc<Mutex<Option<MessageWriter>>>,
}

impl DialerEndpoint {
    /// Creates a new (not yet connected) endpoint.
    pub fn new(config: DialerConfig) -> Self {
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the dial loop on a background task.
    ///
    /// Returns a channel receiver that delivers [`NetworkEvent`]s to the caller.
    pub fn start(self: Arc<Self>, running: Arc<AtomicBool>) -> mpsc::Receiver<NetworkEvent> {
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            let addr = self.config.guest_addr;

            while running.load(Ordering::Relaxed) {
                match time::timeout(self.config.connect_timeout, stream::connect(&addr)).await {
                    Ok(Ok((reader, writer))) => {
                        *self.writer.lock().await = Some(writer);
                        info!("connected to guest at {addr}");
                        if tx
                            .send(NetworkEvent::Connected { guest_addr: addr })
                            .await
                            .is_err()
                        {
                            break;
                        }

                        let receiver_alive = Self::read_loop(reader, &tx).await;

                        *self.writer.lock().await = None;
                        info!(
                            "guest connection closed; redialing in {:?}",
                            self.config.reconnect_interval
                        );
                        if !receiver_alive || tx.send(NetworkEvent::Disconnected).await.is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("could not connect to guest at {addr}: {e}");
                        if tx.send(NetworkEvent::Disconnected).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        warn!(
                            "connecting to guest at {addr} timed out after {:?}",
                            self.config.connect_timeout
                        );
                        if tx.send(NetworkEvent::Disconnected).await.is_err() {
                            break;
                        }
                    }
                }

                if running.load(Ordering::Relaxed) {
                    time::sleep(self.config.reconnect_interval).await;
                }
            }
            debug!("dialer stopped");
        });

        rx
    }

    /// Forwards messages until the stream ends.
    ///
    /// Returns `false` if the event receiver has been dropped.
    async fn read_loop(mut reader: MessageReader, tx: &mpsc::Sender<NetworkEvent>) -> bool {
        while let Some(message) = reader.next_message().await {
            debug!("received '{}' from guest", message.type_name());
            if tx.send(NetworkEvent::MessageReceived(message)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Returns `true` while a stream to the guest is live.
    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

#[async_trait]
impl MessageSink for DialerEndpoint {
    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ChannelError::NotConnected)?;
        writer.send(message).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
