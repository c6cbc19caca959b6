//! Wire message types for the host ↔ guest control channel.
//!
//! Every message is a JSON object with a `"type"` field that identifies the
//! variant; all other fields sit alongside it in the same object:
//!
//! ```json
//! {"type":"selection","request_id":"6f1c…","device_id":"1:2","target_vm":"vmA","ts":1718000000.5}
//! {"type":"ack","request_id":"6f1c…","status":"ok","message":"","ts":1718000000.6}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles the discriminant.
//!
//! | type             | direction   |
//! |------------------|-------------|
//! | `snapshot`       | host → guest |
//! | `selection`      | guest → host |
//! | `connect_change` | guest → host |
//! | `ack`            | host → guest |
//! | `device_removed` | reserved, neither side sends it |
//!
//! A line whose `type` is not one of the above decodes to [`Message::Unknown`]
//! so that receivers can log it and carry on.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain::schema::{deserialize_mounts, DeviceId, DeviceMeta, Schema, VmId};

/// Correlation id carried by every request and echoed by its ack.
pub type RequestId = String;

/// A single message on the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Full authoritative state pushed by the host.
    Snapshot(SnapshotMessage),
    /// Guest asks to attach a device that currently has no confirmed VM.
    Selection(ChangeRequest),
    /// Guest asks to move a device from its confirmed VM to another one.
    ConnectChange(ChangeRequest),
    /// Host's decision on a previous request.
    Ack(AckMessage),
    /// Reserved: announces that a device went away.  Currently never sent.
    DeviceRemoved {
        /// The device that disappeared.
        device_id: DeviceId,
    },
    /// Any `type` value this build does not recognise.
    #[serde(other)]
    Unknown,
}

/// Body of a `snapshot` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMessage {
    /// Every device the host knows about.
    #[serde(default)]
    pub devices: BTreeMap<DeviceId, DeviceMeta>,
    /// Current device → VM assignments.
    #[serde(
        rename = "current-mount",
        default,
        deserialize_with = "deserialize_mounts"
    )]
    pub current_mount: BTreeMap<DeviceId, VmId>,
    /// Seconds since the Unix epoch when the snapshot was produced.
    #[serde(default)]
    pub ts: f64,
}

/// Body of a `selection` or `connect_change` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Unique id the host echoes back in its ack.
    pub request_id: RequestId,
    /// The device to move.
    pub device_id: DeviceId,
    /// The VM the user picked.
    pub target_vm: VmId,
    /// Seconds since the Unix epoch when the request was sent.
    #[serde(default)]
    pub ts: f64,
}

/// Outcome reported by an ack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// The host approved the request.
    Ok,
    /// The host denied the request.  Also assumed when `status` is missing.
    #[default]
    Error,
}

/// Body of an `ack` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    /// Id of the request this ack answers.
    pub request_id: RequestId,
    /// Approval or denial.
    #[serde(default)]
    pub status: AckStatus,
    /// Human-readable reason; empty when approved.
    #[serde(default)]
    pub message: String,
    /// Seconds since the Unix epoch when the ack was sent.
    #[serde(default)]
    pub ts: f64,
}

impl AckMessage {
    /// Returns `true` when the host approved the request.
    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }
}

/// Which request variant a guest action maps to.
///
/// Purely informational: the host authorizes both kinds identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// The device has no confirmed VM yet (`selection` on the wire).
    Select,
    /// The device is moving away from a confirmed VM (`connect_change`).
    Change,
}

impl RequestKind {
    /// Classifies a request by the device's current confirmed assignment.
    pub fn for_current(connected_to: Option<&str>) -> Self {
        if connected_to.is_some() {
            Self::Change
        } else {
            Self::Select
        }
    }

    /// Wraps `request` in the matching [`Message`] variant.
    pub fn into_message(self, request: ChangeRequest) -> Message {
        match self {
            Self::Select => Message::Selection(request),
            Self::Change => Message::ConnectChange(request),
        }
    }
}

impl Message {
    /// Builds a `snapshot` from the host schema, passing both tables through as-is.
    pub fn snapshot(schema: &Schema) -> Self {
        Self::Snapshot(SnapshotMessage {
            devices: schema.devices.clone(),
            current_mount: schema.current_mount.clone(),
            ts: unix_timestamp(),
        })
    }

    /// Builds an `ack` for `request_id`.
    pub fn ack(request_id: impl Into<RequestId>, approved: bool, message: impl Into<String>) -> Self {
        Self::Ack(AckMessage {
            request_id: request_id.into(),
            status: if approved { AckStatus::Ok } else { AckStatus::Error },
            message: message.into(),
            ts: unix_timestamp(),
        })
    }

    /// The wire `type` string, for log lines.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "snapshot",
            Self::Selection(_) => "selection",
            Self::ConnectChange(_) => "connect_change",
            Self::Ack(_) => "ack",
            Self::DeviceRemoved { .. } => "device_removed",
            Self::Unknown => "unknown",
        }
    }
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
///
/// Returns `0.0` if the system clock is set before 1970.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
