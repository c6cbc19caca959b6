//! File-backed test transport.
//!
//! Plays the host from a local JSON file in the host schema format, so the
//! guest can be exercised without a host or a VM:
//!
//! - On start it reports `Connected` and a snapshot of the file.
//! - It polls the file's modification time and sends a fresh snapshot
//!   whenever the file changes.
//! - Every `selection` / `connect_change` is answered at once with `ack ok`.
//! - [`GuestTransport::persist_mounts`] rewrites the file's `current-mount`
//!   table, keeping every other key, and then ignores changes for a short
//!   window so the guest's own write does not come back as a snapshot.
//!
//! A file that cannot be read or parsed is treated as an empty document.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use devroute_core::domain::schema::{normalize, CURRENT_MOUNT_KEY};
use devroute_core::{
    unix_timestamp, ChannelError, DeviceId, Message, Schema, SnapshotMessage, VmId,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::application::service::{GuestTransport, SaveError, TransportEvent};

/// Default interval between modification-time checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default window after a save in which file changes are ignored.
pub const DEFAULT_WRITE_SUPPRESS: Duration = Duration::from_millis(500);

/// Configuration for the test transport.
#[derive(Debug, Clone)]
pub struct FileTestConfig {
    /// The JSON document standing in for the host.
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub write_suppress: Duration,
}

impl FileTestConfig {
    /// Configuration for `path` with the default timings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_suppress: DEFAULT_WRITE_SUPPRESS,
        }
    }
}

#[derive(Debug, Default)]
struct WatchState {
    last_mtime: Option<SystemTime>,
    suppress_until: Option<Instant>,
}

/// A [`GuestTransport`] backed by a JSON file.
pub struct FileTestTransport {
    config: FileTestConfig,
    /// Event sender while started; acks are pushed through it.
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    state: Mutex<WatchState>,
}

impl FileTestTransport {
    /// Opens the test file, creating it with an empty schema if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a missing file cannot be created.
    pub fn open(config: FileTestConfig) -> io::Result<Self> {
        if !config.path.exists() {
            let empty = json!({ "devices": {}, "current-mount": {} });
            let text = serde_json::to_string_pretty(&empty).map_err(io::Error::other)?;
            std::fs::write(&config.path, text)?;
            info!("created empty test file {}", config.path.display());
        }
        Ok(Self {
            config,
            events: Mutex::new(None),
            state: Mutex::new(WatchState::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Reads the file as a snapshot and remembers its modification time.
    async fn load_snapshot(&self) -> SnapshotMessage {
        self.state.lock().await.last_mtime = modified(&self.config.path);
        read_snapshot(&self.config.path)
    }

    /// Returns a new snapshot if the file changed since the last look and no
    /// suppression window is active.
    async fn poll_change(&self) -> Option<SnapshotMessage> {
        let mtime = modified(&self.config.path)?;
        let mut state = self.state.lock().await;
        if state.last_mtime == Some(mtime) {
            return None;
        }
        if state.suppress_until.is_some_and(|until| Instant::now() < until) {
            return None;
        }
        state.last_mtime = Some(mtime);
        drop(state);

        debug!("{} changed; reloading", self.config.path.display());
        Some(read_snapshot(&self.config.path))
    }
}

#[async_trait]
impl GuestTransport for FileTestTransport {
    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        match message {
            Message::Selection(request) | Message::ConnectChange(request) => {
                let guard = self.events.lock().await;
                let tx = guard.as_ref().ok_or(ChannelError::NotConnected)?;
                // The service task drains this channel itself, so never wait for room.
                tx.try_send(TransportEvent::MessageReceived(Message::ack(
                    request.request_id.clone(),
                    true,
                    "",
                )))
                .map_err(|_| ChannelError::NotConnected)
            }
            other => {
                debug!("test file transport drops '{}'", other.type_name());
                Ok(())
            }
        }
    }

    async fn persist_mounts(&self, mounts: &BTreeMap<DeviceId, VmId>) -> Result<(), SaveError> {
        let path = &self.config.path;
        let mut doc = normalize(read_document(path))?;
        if let Value::Object(object) = &mut doc {
            object.insert(CURRENT_MOUNT_KEY.to_string(), serde_json::to_value(mounts)?);
        }
        let text = serde_json::to_string_pretty(&doc)?;
        std::fs::write(path, text).map_err(|source| SaveError::Io {
            path: path.clone(),
            source,
        })?;

        let mut state = self.state.lock().await;
        state.last_mtime = modified(path);
        state.suppress_until = Some(Instant::now() + self.config.write_suppress);
        Ok(())
    }

    /// Starts the file watcher on a background task.
    fn start(self: Arc<Self>, running: Arc<AtomicBool>) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            *self.events.lock().await = Some(tx.clone());
            info!("test mode: using {}", self.config.path.display());

            let snapshot = self.load_snapshot().await;
            let started = tx.send(TransportEvent::Connected).await.is_ok()
                && tx
                    .send(TransportEvent::MessageReceived(Message::Snapshot(snapshot)))
                    .await
                    .is_ok();

            if started {
                while running.load(Ordering::Relaxed) {
                    time::sleep(self.config.poll_interval).await;
                    if let Some(snapshot) = self.poll_change().await {
                        let event = TransportEvent::MessageReceived(Message::Snapshot(snapshot));
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }

            // Dropping the stored sender lets the receiver see the end.
            *self.events.lock().await = None;
            debug!("test file watcher stopped");
        });

        rx
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Reads the raw JSON document; unreadable or unparsable content is `null`.
fn read_document(path: &Path) -> Value {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            return Value::Null;
        }
    };
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!("{} is not valid JSON: {e}", path.display());
        Value::Null
    })
}

fn read_snapshot(path: &Path) -> SnapshotMessage {
    match Schema::from_value(read_document(path)) {
        Ok(schema) => SnapshotMessage {
            devices: schema.devices,
            current_mount: schema.current_mount,
            ts: unix_timestamp(),
        },
        Err(e) => {
            warn!("{}: {e}; using an empty snapshot", path.display());
            SnapshotMessage {
                ts: unix_timestamp(),
                ..SnapshotMessage::default()
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use devroute_core::ChangeRequest;
    use tokio::time::timeout;

    const STEP: Duration = Duration::from_secs(5);

    fn fast(path: &Path) -> FileTestConfig {
        FileTestConfig {
            path: path.to_path_buf(),
            poll_interval: Duration::from_millis(20),
            write_suppress: Duration::from_millis(500),
        }
    }

    fn selection(id: &str) -> Message {
        Message::Selection(ChangeRequest {
            request_id: id.to_string(),
            device_id: "1:2".to_string(),
            target_vm: "vmA".to_string(),
            ts: 0.0,
        })
    }

    fn touch_later(path: &Path, secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(secs))
            .unwrap();
    }

    async fn next(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(STEP, rx.recv()).await.unwrap().unwrap()
    }

    async fn next_snapshot(rx: &mut mpsc::Receiver<TransportEvent>) -> SnapshotMessage {
        match next(rx).await {
            TransportEvent::MessageReceived(Message::Snapshot(snapshot)) => snapshot,
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_open_creates_missing_file_with_empty_schema() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");

        // Act
        FileTestTransport::open(FileTestConfig::new(&path)).unwrap();

        // Assert
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc, json!({ "devices": {}, "current-mount": {} }));
    }

    #[test]
    fn test_unparsable_file_reads_as_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let snapshot = read_snapshot(&path);

        assert!(snapshot.devices.is_empty());
        assert!(snapshot.current_mount.is_empty());
    }

    #[test]
    fn test_wrong_shape_reads_as_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shape.json");
        std::fs::write(&path, r#"{"devices": []}"#).unwrap();

        assert!(read_snapshot(&path).devices.is_empty());
    }

    #[tokio::test]
    async fn test_start_emits_connected_then_file_snapshot() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{"devices":{"1:2":{"permitted_vms":["vmA","vmB"]}},"current-mount":{"1:2":"vmB"}}"#,
        )
        .unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let transport = Arc::new(FileTestTransport::open(fast(&path)).unwrap());

        // Act
        let mut rx = Arc::clone(&transport).start(Arc::clone(&running));
        let first = next(&mut rx).await;
        let snapshot = next_snapshot(&mut rx).await;
        running.store(false, Ordering::Relaxed);

        // Assert
        assert!(matches!(first, TransportEvent::Connected));
        assert_eq!(snapshot.devices["1:2"].permitted_vms, vec!["vmA", "vmB"]);
        assert_eq!(snapshot.current_mount["1:2"], "vmB");
    }

    #[tokio::test]
    async fn test_send_before_start_is_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTestTransport::open(fast(&dir.path().join("s.json"))).unwrap();

        let result = transport.send(&selection("r-1")).await;

        assert!(matches!(result, Err(ChannelError::NotConnected)));
    }

    #[tokio::test]
    async fn test_requests_are_acked_ok_immediately() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let transport = Arc::new(FileTestTransport::open(fast(&dir.path().join("s.json"))).unwrap());
        let mut rx = Arc::clone(&transport).start(Arc::clone(&running));
        let _connected = next(&mut rx).await;
        let _snapshot = next_snapshot(&mut rx).await;

        // Act
        transport.send(&selection("r-7")).await.unwrap();
        let reply = next(&mut rx).await;
        running.store(false, Ordering::Relaxed);

        // Assert
        let TransportEvent::MessageReceived(Message::Ack(ack)) = reply else {
            panic!("expected an ack, got {reply:?}");
        };
        assert_eq!(ack.request_id, "r-7");
        assert!(ack.is_ok());
        assert_eq!(ack.message, "");
    }

    #[tokio::test]
    async fn test_file_change_produces_new_snapshot() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let running = Arc::new(AtomicBool::new(true));
        let transport = Arc::new(FileTestTransport::open(fast(&path)).unwrap());
        let mut rx = Arc::clone(&transport).start(Arc::clone(&running));
        let _connected = next(&mut rx).await;
        assert!(next_snapshot(&mut rx).await.devices.is_empty());

        // Act
        std::fs::write(&path, r#"{"devices":{"5:6":{"permitted_vms":["vmC"]}}}"#).unwrap();
        touch_later(&path, 5);
        let snapshot = next_snapshot(&mut rx).await;
        running.store(false, Ordering::Relaxed);

        // Assert
        assert!(snapshot.devices.contains_key("5:6"));
    }

    #[tokio::test]
    async fn test_persist_mounts_keeps_other_keys_and_is_not_echoed() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{"devices":{"1:2":{"permitted_vms":["vmA"],"Vendor":"Acme"}},"current-mount":{},"note":"keep me"}"#,
        )
        .unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let transport = Arc::new(FileTestTransport::open(fast(&path)).unwrap());
        let mut rx = Arc::clone(&transport).start(Arc::clone(&running));
        let _connected = next(&mut rx).await;
        let _snapshot = next_snapshot(&mut rx).await;
        let mounts = BTreeMap::from([("1:2".to_string(), "vmA".to_string())]);

        // Act
        transport.persist_mounts(&mounts).await.unwrap();
        let echoed = timeout(Duration::from_millis(200), rx.recv()).await;
        running.store(false, Ordering::Relaxed);

        // Assert
        assert!(echoed.is_err(), "own write must not come back as a snapshot");
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["current-mount"], json!({ "1:2": "vmA" }));
        assert_eq!(doc["note"], "keep me");
        assert_eq!(doc["devices"]["1:2"]["Vendor"], "Acme");
    }

    #[tokio::test]
    async fn test_changes_inside_suppress_window_are_ignored() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let running = Arc::new(AtomicBool::new(true));
        let mut config = fast(&path);
        config.write_suppress = Duration::from_secs(30);
        let transport = Arc::new(FileTestTransport::open(config).unwrap());
        let mut rx = Arc::clone(&transport).start(Arc::clone(&running));
        let _connected = next(&mut rx).await;
        let _snapshot = next_snapshot(&mut rx).await;

        // Act: save, then an outside edit right after
        transport.persist_mounts(&BTreeMap::new()).await.unwrap();
        touch_later(&path, 5);
        let seen = timeout(Duration::from_millis(200), rx.recv()).await;
        running.store(false, Ordering::Relaxed);

        // Assert
        assert!(seen.is_err());
    }

    #[tokio::test]
    async fn test_persist_refuses_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"{"current-mount": 3}"#).unwrap();
        let transport = FileTestTransport::open(fast(&path)).unwrap();

        let result = transport.persist_mounts(&BTreeMap::new()).await;

        assert!(matches!(result, Err(SaveError::Schema(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"current-mount": 3}"#);
    }
}
