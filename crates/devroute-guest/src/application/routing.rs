//! Per-device routing state machine.
//!
//! # States (for beginners)
//!
//! Every device is either *idle* or has exactly one *pending* request:
//!
//! ```text
//!            user picks another VM
//!   Idle ───────────────────────────► Pending
//!    ▲                                   │
//!    │  ack ok      → commit             │
//!    │  ack error   → roll back          │
//!    │  deadline    → roll back          │
//!    └───────────────────────────────────┘
//! ```
//!
//! - Entering *Pending* captures the device's confirmed VM as
//!   `previous_selection`, moves `selected` to the target, and stamps a
//!   deadline.
//! - *Commit* copies `selected` into `connected_to`.
//! - *Roll back* puts `selected` back to `previous_selection`.
//!
//! Every resolution path removes the entry from the table first, so whichever
//! of "ack arrives" or "deadline passes" happens first wins and the other
//! finds nothing to do.  The table is owned by the single dispatcher task in
//! [`crate::application::service`], so no locking is needed.

use std::collections::HashMap;
use std::time::Duration;

use devroute_core::{
    unix_timestamp, AckMessage, ChangeRequest, DeviceId, Message, RequestId, RequestKind, VmId,
};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::application::registry::{DeviceRecord, Registry};

/// Reason given when a request's deadline passes without an ack.
pub const NO_ACK_MESSAGE: &str = "no ACK from host";

/// Why a user action was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestRejected {
    /// The device already has a request in flight.
    #[error("a request for this device is already pending")]
    AlreadyPending,
    /// The device is not in the registry.
    #[error("unknown device")]
    UnknownDevice,
    /// The guest service has shut down.
    #[error("guest service is not running")]
    ServiceStopped,
}

/// What a successful user action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// A request was sent; its result arrives later as `RequestResolved`.
    Requested(RequestId),
    /// The target is already the confirmed VM; only the selection was set.
    Unchanged,
    /// The selection was cleared locally.
    Cleared,
}

/// An in-flight request awaiting its ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub device_id: DeviceId,
    pub target: VmId,
    pub kind: RequestKind,
    /// `connected_to` at the moment the request was created.
    pub previous_selection: Option<VmId>,
    pub deadline: Instant,
}

/// Result of [`RoutingTable::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A new pending entry exists and `message` must be sent to the host.
    Requested {
        request_id: RequestId,
        message: Message,
    },
    /// The target equals the confirmed VM; nothing to send.
    Unchanged,
}

/// The outcome of a finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub request_id: RequestId,
    pub device_id: DeviceId,
    pub ok: bool,
    pub message: String,
    /// The device's record after commit or rollback.  `None` when the device
    /// was removed by a snapshot while the request was pending.
    pub record: Option<DeviceRecord>,
}

/// Pending requests keyed by request id.
#[derive(Debug, Default)]
pub struct RoutingTable {
    pending: HashMap<RequestId, PendingRequest>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, request_id: &str) -> Option<&PendingRequest> {
        self.pending.get(request_id)
    }

    /// Returns `true` if `device_id` has a request in flight.
    pub fn is_pending(&self, device_id: &str) -> bool {
        self.pending.values().any(|p| p.device_id == device_id)
    }

    /// Starts a change of `device_id` to `target`.
    ///
    /// On [`Transition::Requested`] the registry already shows the new
    /// selection and the caller must deliver the returned message.
    ///
    /// # Errors
    ///
    /// - [`RequestRejected::UnknownDevice`] if the device is not registered.
    /// - [`RequestRejected::AlreadyPending`] if a request for it is in flight.
    pub fn begin(
        &mut self,
        registry: &mut Registry,
        device_id: &str,
        target: &str,
        ack_timeout: Duration,
        now: Instant,
    ) -> Result<Transition, RequestRejected> {
        if !registry.contains(device_id) {
            return Err(RequestRejected::UnknownDevice);
        }
        if self.is_pending(device_id) {
            return Err(RequestRejected::AlreadyPending);
        }
        let record = registry
            .get_mut(device_id)
            .ok_or(RequestRejected::UnknownDevice)?;

        if record.connected_to.as_deref() == Some(target) {
            record.selected = Some(target.to_string());
            return Ok(Transition::Unchanged);
        }

        let previous_selection = record.connected_to.clone();
        let kind = RequestKind::for_current(previous_selection.as_deref());
        record.selected = Some(target.to_string());

        let request_id = Uuid::new_v4().to_string();
        let message = kind.into_message(ChangeRequest {
            request_id: request_id.clone(),
            device_id: device_id.to_string(),
            target_vm: target.to_string(),
            ts: unix_timestamp(),
        });

        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                request_id: request_id.clone(),
                device_id: device_id.to_string(),
                target: target.to_string(),
                kind,
                previous_selection,
                deadline: now + ack_timeout,
            },
        );

        Ok(Transition::Requested {
            request_id,
            message,
        })
    }

    /// Clears the local selection of an idle device.
    pub fn clear_selection(
        &self,
        registry: &mut Registry,
        device_id: &str,
    ) -> Result<(), RequestRejected> {
        if self.is_pending(device_id) {
            return Err(RequestRejected::AlreadyPending);
        }
        let record = registry
            .get_mut(device_id)
            .ok_or(RequestRejected::UnknownDevice)?;
        record.selected = None;
        Ok(())
    }

    /// Resolves the request `ack` answers.  Returns `None` for acks that
    /// match nothing (late, duplicate, or foreign).
    pub fn resolve_ack(&mut self, registry: &mut Registry, ack: &AckMessage) -> Option<Resolution> {
        let pending = self.pending.remove(&ack.request_id)?;
        Some(settle(registry, pending, ack.is_ok(), ack.message.clone()))
    }

    /// Rolls back `request_id` immediately, e.g. when it could not be sent.
    pub fn fail(
        &mut self,
        registry: &mut Registry,
        request_id: &str,
        message: impl Into<String>,
    ) -> Option<Resolution> {
        let pending = self.pending.remove(request_id)?;
        Some(settle(registry, pending, false, message.into()))
    }

    /// Rolls back every request whose deadline is at or before `now`,
    /// earliest deadline first.
    pub fn expire(&mut self, registry: &mut Registry, now: Instant) -> Vec<Resolution> {
        let mut due: Vec<PendingRequest> = Vec::new();
        self.pending.retain(|_, p| {
            if p.deadline <= now {
                due.push(p.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|p| p.deadline);
        due.into_iter()
            .map(|p| settle(registry, p, false, NO_ACK_MESSAGE.to_string()))
            .collect()
    }

    /// The earliest deadline among pending requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Pending requests whose target the host no longer permits for their
    /// device.  Removed devices are not reported.
    pub fn stale_against<'a>(&'a self, registry: &'a Registry) -> Vec<&'a PendingRequest> {
        self.pending
            .values()
            .filter(|p| {
                registry
                    .get(&p.device_id)
                    .is_some_and(|record| !record.targets.contains(&p.target))
            })
            .collect()
    }
}

/// Commits or rolls back `pending` against the registry.
fn settle(registry: &mut Registry, pending: PendingRequest, ok: bool, message: String) -> Resolution {
    let record = registry.get_mut(&pending.device_id).map(|record| {
        if ok {
            record.connected_to = record.selected.clone();
        } else {
            record.selected = pending.previous_selection.clone();
        }
        record.clone()
    });

    Resolution {
        request_id: pending.request_id,
        device_id: pending.device_id,
        ok,
        message,
        record,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
