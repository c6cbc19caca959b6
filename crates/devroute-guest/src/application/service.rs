//! Guest service: the single task that owns the registry and the routing
//! table.
//!
//! # How it fits together (for beginners)
//!
//! ```text
//!  transport (listener or test file)         UI / console
//!        │ TransportEvent                        │ GuestHandle::request_change …
//!        ▼                                       ▼
//!  ┌──────────────────────── GuestService::run ─────────────────────────┐
//!  │ select! {                                                          │
//!  │     transport event  → reconcile snapshot / resolve ack            │
//!  │     user command     → begin request, send, reply                  │
//!  │     earliest deadline→ roll back expired requests                  │
//!  │ }                                                                  │
//!  └────────────────────────────────────────────────────────────────────┘
//!        │ GuestEvent
//!        ▼
//!     UI / console
//! ```
//!
//! Because only this task touches the registry and the pending table, the
//! "one pending request per device" and "exactly one resolution per request"
//! rules hold without any locking.  Concurrent callers are serialised by the
//! command channel.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use async_trait::async_trait;
use devroute_core::{ChannelError, DeviceId, Message, SchemaError, StreamAddress, VmId};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::application::events::GuestEvent;
use crate::application::reconcile::apply_snapshot;
use crate::application::registry::{DeviceRecord, Registry};
use crate::application::routing::{
    ChangeOutcome, RequestRejected, Resolution, RoutingTable, Transition,
};

/// Default time the guest waits for an ack before rolling back.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(6);

/// Events a transport delivers to the service.
#[derive(Debug)]
pub enum TransportEvent {
    /// The listener is bound and waiting for the host.
    Listening { address: StreamAddress },
    /// The host is connected.
    Connected,
    /// The host connection ended.
    Disconnected,
    /// A message arrived from the host.
    MessageReceived(Message),
}

/// Error type for [`GuestHandle::save`].
#[derive(Debug, Error)]
pub enum SaveError {
    /// The active transport has nowhere to save to.
    #[error("saving is only supported by the test-file transport")]
    Unsupported,

    /// The document could not be written.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing document has the wrong shape.
    #[error("refusing to overwrite: {0}")]
    Schema(#[from] SchemaError),

    /// The document could not be serialised.
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    /// The guest service has shut down.
    #[error("guest service is not running")]
    ServiceStopped,
}

/// A source of host messages and a sink for guest requests.
///
/// Implemented by the vsock/TCP listener and by the file-backed test
/// transport.  The service never knows which one it is talking to.
#[async_trait]
pub trait GuestTransport: Send + Sync {
    /// Sends one message to the host.
    async fn send(&self, message: &Message) -> Result<(), ChannelError>;

    /// Writes the current device → VM table back to the transport's backing
    /// store.  Only the test-file transport has one.
    async fn persist_mounts(&self, _mounts: &BTreeMap<DeviceId, VmId>) -> Result<(), SaveError> {
        Err(SaveError::Unsupported)
    }

    /// Starts the transport on a background task and returns its events.
    fn start(self: Arc<Self>, running: Arc<AtomicBool>) -> mpsc::Receiver<TransportEvent>;
}

/// Requests sent from [`GuestHandle`]s to the service task.
#[derive(Debug)]
enum Command {
    RequestChange {
        device_id: DeviceId,
        target_vm: VmId,
        reply: oneshot::Sender<Result<ChangeOutcome, RequestRejected>>,
    },
    ClearSelection {
        device_id: DeviceId,
        reply: oneshot::Sender<Result<ChangeOutcome, RequestRejected>>,
    },
    ListDevices {
        reply: oneshot::Sender<Vec<(DeviceId, DeviceRecord)>>,
    },
    Save {
        reply: oneshot::Sender<Result<usize, SaveError>>,
    },
}

/// Cloneable front door to a running [`GuestService`].
#[derive(Debug, Clone)]
pub struct GuestHandle {
    commands: mpsc::Sender<Command>,
}

impl GuestHandle {
    /// Asks to move `device_id` to `target_vm`.
    ///
    /// `Ok(Requested(id))` means the request is in flight; its outcome is
    /// published later as [`GuestEvent::RequestResolved`] with the same id.
    pub async fn request_change(
        &self,
        device_id: impl Into<DeviceId>,
        target_vm: impl Into<VmId>,
    ) -> Result<ChangeOutcome, RequestRejected> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::RequestChange {
                device_id: device_id.into(),
                target_vm: target_vm.into(),
                reply,
            })
            .await
            .map_err(|_| RequestRejected::ServiceStopped)?;
        rx.await.map_err(|_| RequestRejected::ServiceStopped)?
    }

    /// Clears the local selection of an idle device.  Nothing is sent.
    pub async fn clear_selection(
        &self,
        device_id: impl Into<DeviceId>,
    ) -> Result<ChangeOutcome, RequestRejected> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ClearSelection {
                device_id: device_id.into(),
                reply,
            })
            .await
            .map_err(|_| RequestRejected::ServiceStopped)?;
        rx.await.map_err(|_| RequestRejected::ServiceStopped)?
    }

    /// Every known device, sorted by id.
    pub async fn devices(&self) -> Result<Vec<(DeviceId, DeviceRecord)>, RequestRejected> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ListDevices { reply })
            .await
            .map_err(|_| RequestRejected::ServiceStopped)?;
        rx.await.map_err(|_| RequestRejected::ServiceStopped)
    }

    /// Persists the current mounts through the transport.
    ///
    /// Returns the number of mounts written.
    pub async fn save(&self) -> Result<usize, SaveError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Save { reply })
            .await
            .map_err(|_| SaveError::ServiceStopped)?;
        rx.await.map_err(|_| SaveError::ServiceStopped)?
    }
}

/// Owns all guest state and processes events one at a time.
pub struct GuestService {
    transport: Arc<dyn GuestTransport>,
    registry: Registry,
    routing: RoutingTable,
    ack_timeout: Duration,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<GuestEvent>,
    connected: bool,
}

impl GuestService {
    /// Creates the service, a handle for issuing commands, and the stream of
    /// [`GuestEvent`]s for the UI.
    pub fn new(
        transport: Arc<dyn GuestTransport>,
        ack_timeout: Duration,
    ) -> (Self, GuestHandle, mpsc::UnboundedReceiver<GuestEvent>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let service = Self {
            transport,
            registry: Registry::new(),
            routing: RoutingTable::new(),
            ack_timeout,
            commands: command_rx,
            events: event_tx,
            connected: false,
        };
        (
            service,
            GuestHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }

    /// Processes events until the transport's event channel closes.
    ///
    /// Commands keep being served after every handle is dropped, as long as
    /// the transport is alive.
    pub async fn run(mut self, mut transport_events: mpsc::Receiver<TransportEvent>) {
        let mut commands_open = true;

        loop {
            let deadline = self.routing.next_deadline();

            tokio::select! {
                event = transport_events.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        info!("transport closed; guest service stopping");
                        break;
                    }
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("all guest handles dropped");
                        commands_open = false;
                    }
                },
                () = sleep_until_opt(deadline) => self.expire_requests(Instant::now()),
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Listening { address } => info!("listening for host on {address}"),
            TransportEvent::Connected => self.set_connected(true),
            TransportEvent::Disconnected => self.set_connected(false),
            TransportEvent::MessageReceived(message) => self.handle_message(message),
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Snapshot(snapshot) => {
                debug!(
                    "snapshot: {} device(s), {} mount(s)",
                    snapshot.devices.len(),
                    snapshot.current_mount.len()
                );
                for event in apply_snapshot(&mut self.registry, &snapshot) {
                    self.emit(event);
                }
                for stale in self.routing.stale_against(&self.registry) {
                    warn!(
                        "pending request {} moves {} to '{}', which the host no longer permits",
                        stale.request_id, stale.device_id, stale.target
                    );
                }
            }
            Message::Ack(ack) => match self.routing.resolve_ack(&mut self.registry, &ack) {
                Some(resolution) => self.publish_resolution(resolution),
                None => debug!("ignoring ack for unknown request {}", ack.request_id),
            },
            other => debug!("ignoring '{}' message from host", other.type_name()),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::RequestChange {
                device_id,
                target_vm,
                reply,
            } => {
                let result = self.request_change(&device_id, &target_vm).await;
                let _ = reply.send(result);
            }
            Command::ClearSelection { device_id, reply } => {
                let result = self.clear_selection(&device_id);
                let _ = reply.send(result);
            }
            Command::ListDevices { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Save { reply } => {
                let mounts = self.registry.mounts();
                let result = self
                    .transport
                    .persist_mounts(&mounts)
                    .await
                    .map(|()| mounts.len());
                match &result {
                    Ok(count) => info!("saved {count} mount(s)"),
                    Err(e) => warn!("save failed: {e}"),
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn request_change(
        &mut self,
        device_id: &str,
        target_vm: &str,
    ) -> Result<ChangeOutcome, RequestRejected> {
        let transition = self.routing.begin(
            &mut self.registry,
            device_id,
            target_vm,
            self.ack_timeout,
            Instant::now(),
        );

        match transition {
            Ok(Transition::Requested {
                request_id,
                message,
            }) => {
                self.emit_device(device_id);
                info!(
                    "requesting {device_id} → '{target_vm}' ({}, id {request_id})",
                    message.type_name()
                );
                if let Err(e) = self.transport.send(&message).await {
                    error!("failed to send {} for {device_id}: {e}", message.type_name());
                    if let Some(resolution) = self.routing.fail(
                        &mut self.registry,
                        &request_id,
                        format!("failed to send: {e}"),
                    ) {
                        self.publish_resolution(resolution);
                    }
                }
                Ok(ChangeOutcome::Requested(request_id))
            }
            Ok(Transition::Unchanged) => {
                debug!("{device_id} is already on '{target_vm}'");
                self.emit_device(device_id);
                Ok(ChangeOutcome::Unchanged)
            }
            Err(RequestRejected::AlreadyPending) => {
                debug!("rejecting change of {device_id}: request already pending");
                self.emit_device(device_id);
                Err(RequestRejected::AlreadyPending)
            }
            Err(e) => Err(e),
        }
    }

    fn clear_selection(&mut self, device_id: &str) -> Result<ChangeOutcome, RequestRejected> {
        match self.routing.clear_selection(&mut self.registry, device_id) {
            Ok(()) => {
                self.emit_device(device_id);
                Ok(ChangeOutcome::Cleared)
            }
            Err(RequestRejected::AlreadyPending) => {
                self.emit_device(device_id);
                Err(RequestRejected::AlreadyPending)
            }
            Err(e) => Err(e),
        }
    }

    fn expire_requests(&mut self, now: Instant) {
        for resolution in self.routing.expire(&mut self.registry, now) {
            self.publish_resolution(resolution);
        }
    }

    fn publish_resolution(&self, resolution: Resolution) {
        let Resolution {
            request_id,
            device_id,
            ok,
            message,
            record,
        } = resolution;

        if ok {
            info!("request {request_id} for {device_id} approved");
        } else {
            warn!("request {request_id} for {device_id} failed: {message}");
        }

        match record {
            Some(record) => self.emit(GuestEvent::DeviceUpdated {
                id: device_id.clone(),
                record,
            }),
            None => debug!("{device_id} was removed before its request resolved"),
        }
        self.emit(GuestEvent::RequestResolved {
            request_id,
            device_id,
            ok,
            message,
        });
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        if connected {
            info!("host connected");
        } else {
            info!("host disconnected");
        }
        self.emit(GuestEvent::ConnectionStateChanged(connected));
    }

    /// Re-publishes the current record of `device_id`, if it exists.
    fn emit_device(&self, device_id: &str) {
        if let Some(record) = self.registry.get(device_id) {
            self.emit(GuestEvent::DeviceUpdated {
                id: device_id.to_string(),
                record: record.clone(),
            });
        }
    }

    fn emit(&self, event: GuestEvent) {
        // A dropped UI is not an error; the service keeps routing.
        let _ = self.events.send(event);
    }
}

/// Sleeps until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
