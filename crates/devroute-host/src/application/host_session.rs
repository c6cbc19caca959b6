//! Host session use case.
//!
//! Consumes [`NetworkEvent`]s from the dialer one at a time and produces the
//! host's side of the conversation:
//!
//! ```text
//! Connected            → send snapshot (devices + current-mount + ts)
//! selection            → authorize → [ack_delay] → send ack
//! connect_change       → authorize → [ack_delay] → send ack
//! anything else        → log and ignore
//! Disconnected         → log (once) and wait for the next Connected
//! ```
//!
//! The schema is loaded once by the binary and never changes while the host
//! runs, so every reconnection receives the same snapshot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devroute_core::{ChangeRequest, ChannelError, Message, Schema, StreamAddress};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::authorize::{authorize, Decision};

/// Events emitted by the network layer to the host session.
#[derive(Debug)]
pub enum NetworkEvent {
    /// A message was received from the guest.
    MessageReceived(Message),
    /// A stream to the guest was established.
    Connected { guest_addr: StreamAddress },
    /// The stream was lost, or a connection attempt failed.
    Disconnected,
}

/// Outbound half of the control channel as seen by the session.
///
/// The dialer endpoint implements this; unit tests use the generated
/// `MockMessageSink`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Sends one message to the guest.
    async fn send(&self, message: &Message) -> Result<(), ChannelError>;
}

/// Drives the host side of the protocol.
pub struct HostSession {
    schema: Arc<Schema>,
    sink: Arc<dyn MessageSink>,
    ack_delay: Duration,
    connected: bool,
}

impl HostSession {
    /// Creates a session that answers through `sink`.
    ///
    /// `ack_delay` is an artificial pause before each ack, used to exercise
    /// the guest's pending state by hand.  Zero disables it.
    pub fn new(schema: Arc<Schema>, sink: Arc<dyn MessageSink>, ack_delay: Duration) -> Self {
        Self {
            schema,
            sink,
            ack_delay,
            connected: false,
        }
    }

    /// Returns `true` between a `Connected` event and the next `Disconnected`.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Processes events until the sender side is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<NetworkEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("host session event stream closed");
    }

    /// Dispatches a single event.
    pub async fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected { guest_addr } => self.on_connected(guest_addr).await,
            NetworkEvent::Disconnected => self.on_disconnected(),
            NetworkEvent::MessageReceived(message) => self.on_message(message).await,
        }
    }

    async fn on_connected(&mut self, guest_addr: StreamAddress) {
        self.connected = true;
        info!(
            "guest connected at {guest_addr}; sending snapshot with {} device(s)",
            self.schema.devices.len()
        );
        let snapshot = Message::snapshot(&self.schema);
        if let Err(e) = self.sink.send(&snapshot).await {
            error!("failed to send snapshot: {e}");
        }
    }

    fn on_disconnected(&mut self) {
        if self.connected {
            info!("guest disconnected");
            self.connected = false;
        }
    }

    async fn on_message(&mut self, message: Message) {
        match message {
            Message::Selection(request) | Message::ConnectChange(request) => {
                self.answer(request).await;
            }
            other => {
                warn!("ignoring unexpected '{}' message from guest", other.type_name());
            }
        }
    }

    async fn answer(&self, request: ChangeRequest) {
        let Decision { approved, reason } =
            authorize(&self.schema, &request.device_id, &request.target_vm);

        if approved {
            info!(
                "request {}: {} -> {} approved",
                request.request_id, request.device_id, request.target_vm
            );
        } else {
            info!(
                "request {}: {} -> {} denied: {reason}",
                request.request_id, request.device_id, request.target_vm
            );
        }

        if !self.ack_delay.is_zero() {
            debug!("delaying ack by {:?}", self.ack_delay);
            tokio::time::sleep(self.ack_delay).await;
        }

        let ack = Message::ack(request.request_id, approved, reason);
        if let Err(e) = self.sink.send(&ack).await {
            error!("failed to send ack: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
