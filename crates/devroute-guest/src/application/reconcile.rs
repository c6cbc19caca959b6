//! Snapshot reconciliation.
//!
//! A snapshot is the host's full state, so applying it is a replace, not a
//! merge:
//!
//! 1. Every device the registry knows but the snapshot lacks is removed.
//! 2. Every device in the snapshot gets a *fresh* record built from its entry
//!    and its mount.  Local selections are not carried over.
//!
//! Pending requests are not touched here.  Their deadlines and captured
//! previous selections stay valid, and a request whose device was removed
//! still resolves later (the routing table just skips the display update).

use devroute_core::SnapshotMessage;

use crate::application::events::GuestEvent;
use crate::application::registry::{DeviceRecord, Registry};

/// Replaces the registry contents with `snapshot` and returns the resulting
/// events: removals first, then additions and updates in device-id order.
pub fn apply_snapshot(registry: &mut Registry, snapshot: &SnapshotMessage) -> Vec<GuestEvent> {
    let mut events = Vec::with_capacity(registry.len() + snapshot.devices.len());

    let gone: Vec<_> = registry
        .ids()
        .filter(|id| !snapshot.devices.contains_key(*id))
        .cloned()
        .collect();
    for id in gone {
        registry.remove(&id);
        events.push(GuestEvent::DeviceRemoved { id });
    }

    for (id, meta) in &snapshot.devices {
        let record = DeviceRecord::from_snapshot(meta, snapshot.current_mount.get(id));
        let existed = registry.insert(id.clone(), record.clone()).is_some();
        events.push(if existed {
            GuestEvent::DeviceUpdated {
                id: id.clone(),
                record,
            }
        } else {
            GuestEvent::DeviceAdded {
                id: id.clone(),
                record,
            }
        });
    }

    events
}

// ── Tests ─────────────────────────────────────────────────────────────────────
