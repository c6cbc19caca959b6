//! Listener endpoint: the guest's side of the control channel.
//!
//! The guest listens; the host dials in.  Exactly one host connection is
//! served at a time:
//!
//! ```text
//! loop while running:
//!     bind address                        (failure → sleep backoff, retry)
//!     emit Listening { resolved address }
//!     loop while running:
//!         accept, polling every 200 ms    (failure → drop listener, sleep backoff, rebind)
//!         store writer, emit Connected
//!         read until EOF, emit MessageReceived for each message
//!         clear writer, emit Disconnected
//! ```

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use devroute_core::{
    split_stream, ChannelError, Message, MessageReader, MessageWriter, StreamAddress,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tracing::{debug, info, warn};

use crate::application::service::{GuestTransport, TransportEvent};

/// Default pause before rebinding after a bind or accept failure.
pub const DEFAULT_REBIND_BACKOFF: Duration = Duration::from_secs(1);

/// How often a blocked accept wakes up to check the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Configuration for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Where to listen, e.g. `vsock:any:7000` or `tcp:127.0.0.1:7000`.
    pub address: StreamAddress,
    /// Pause before rebinding after a failure.
    pub rebind_backoff: Duration,
}

impl ListenerConfig {
    /// Configuration for `address` with the default backoff.
    pub fn new(address: StreamAddress) -> Self {
        Self {
            address,
            rebind_backoff: DEFAULT_REBIND_BACKOFF,
        }
    }
}

/// Serves one host connection at a time on a vsock or TCP listener.
pub struct ListenerEndpoint {
    config: ListenerConfig,
    writer: Arc<Mutex<Option<MessageWriter>>>,
}

/// Why the accept loop for one bound listener ended.
enum ServeEnd {
    /// `running` was cleared.
    Stopped,
    /// Nobody consumes events any more.
    ReceiverGone,
    /// `accept` failed; the listener must be rebuilt.
    AcceptFailed,
}

impl ListenerEndpoint {
    /// Creates a new (not yet bound) endpoint.
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns `true` while a host connection is live.
    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Accepts connections on `listener` until it fails or the service stops.
    async fn serve(
        &self,
        listener: &mut BoundListener,
        running: &AtomicBool,
        tx: &mpsc::Sender<TransportEvent>,
    ) -> ServeEnd {
        while running.load(Ordering::Relaxed) {
            // Short timeout so the `running` flag is seen without a connection.
            let accepted = match time::timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(accepted) => accepted,
                Err(_) => continue,
            };

            let (reader, writer, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("accept failed on {}: {e}", self.config.address);
                    return ServeEnd::AcceptFailed;
                }
            };

            *self.writer.lock().await = Some(writer);
            info!("host connected from {peer}");
            if tx.send(TransportEvent::Connected).await.is_err() {
                return ServeEnd::ReceiverGone;
            }

            let receiver_alive = read_loop(reader, tx).await;

            *self.writer.lock().await = None;
            info!("host connection from {peer} closed");
            if !receiver_alive || tx.send(TransportEvent::Disconnected).await.is_err() {
                return ServeEnd::ReceiverGone;
            }
        }
        ServeEnd::Stopped
    }
}

#[async_trait]
impl GuestTransport for ListenerEndpoint {
    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ChannelError::NotConnected)?;
        writer.send(message).await
    }

    /// Starts the bind/accept loop on a background task.
    fn start(self: Arc<Self>, running: Arc<AtomicBool>) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            let address = self.config.address;
            let backoff = self.config.rebind_backoff;

            while running.load(Ordering::Relaxed) {
                let mut listener = match BoundListener::bind(&address).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        warn!("could not listen on {address}: {e}; retrying in {backoff:?}");
                        time::sleep(backoff).await;
                        continue;
                    }
                };

                let local = listener.local_address().unwrap_or(address);
                info!("listening for host on {local}");
                if tx
                    .send(TransportEvent::Listening { address: local })
                    .await
                    .is_err()
                {
                    break;
                }

                match self.serve(&mut listener, &running, &tx).await {
                    ServeEnd::Stopped | ServeEnd::ReceiverGone => break,
                    ServeEnd::AcceptFailed => {
                        drop(listener);
                        time::sleep(backoff).await;
                    }
                }
            }
            debug!("listener stopped");
        });

        rx
    }
}

/// Forwards messages until the stream ends.
///
/// Returns `false` if the event receiver has been dropped.
async fn read_loop(mut reader: MessageReader, tx: &mpsc::Sender<TransportEvent>) -> bool {
    while let Some(message) = reader.next_message().await {
        debug!("received '{}' from host", message.type_name());
        if tx
            .send(TransportEvent::MessageReceived(message))
            .await
            .is_err()
        {
            return false;
        }
    }
    true
}

// ── Socket families ───────────────────────────────────────────────────────────

/// A bound TCP or vsock listener.
enum BoundListener {
    Tcp(TcpListener),
    #[cfg(target_os = "linux")]
    Vsock(tokio_vsock::VsockListener),
}

impl BoundListener {
    /// Binds `address`.
    ///
    /// On platforms without vsock support a vsock address fails with
    /// [`io::ErrorKind::Unsupported`].
    async fn bind(address: &StreamAddress) -> io::Result<Self> {
        match *address {
            StreamAddress::Tcp(addr) => Ok(Self::Tcp(TcpListener::bind(addr).await?)),
            StreamAddress::Vsock { cid, port } => Self::bind_vsock(cid, port),
        }
    }

    #[cfg(target_os = "linux")]
    fn bind_vsock(cid: u32, port: u32) -> io::Result<Self> {
        let listener = tokio_vsock::VsockListener::bind(tokio_vsock::VsockAddr::new(cid, port))?;
        Ok(Self::Vsock(listener))
    }

    #[cfg(not(target_os = "linux"))]
    fn bind_vsock(_cid: u32, _port: u32) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "vsock is only available on Linux",
        ))
    }

    /// The address actually bound (resolves port 0).
    fn local_address(&self) -> io::Result<StreamAddress> {
        match self {
            Self::Tcp(listener) => listener.local_addr().map(StreamAddress::Tcp),
            #[cfg(target_os = "linux")]
            Self::Vsock(listener) => listener.local_addr().map(|addr| StreamAddress::Vsock {
                cid: addr.cid(),
                port: addr.port(),
            }),
        }
    }

    /// Waits for the next connection and returns its channel halves and a
    /// printable peer address.
    async fn accept(&mut self) -> io::Result<(MessageReader, MessageWriter, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = split_stream(stream);
                Ok((reader, writer, format!("tcp:{peer}")))
            }
            #[cfg(target_os = "linux")]
            Self::Vsock(listener) => {
                let (stream, peer) = listener.accept().await?;
                let (reader, writer) = split_stream(stream);
                Ok((reader, writer, format!("vsock:{}:{}", peer.cid(), peer.port())))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
