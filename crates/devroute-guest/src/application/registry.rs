//! In-memory registry of devices known to the guest.
//!
//! Each record keeps two separate notions of "where is this device":
//!
//! - `selected` – what the user picked.  May be ahead of the host while a
//!   request is pending.
//! - `connected_to` – the last assignment the host confirmed, either by a
//!   snapshot or by an `ack ok`.
//!
//! Records are created, replaced, and deleted only by the snapshot
//! reconciler.  The routing table additionally rewrites `selected` and
//! `connected_to` when a request starts or resolves.

use std::collections::BTreeMap;

use devroute_core::{DeviceId, DeviceMeta, VmId};

/// The guest's view of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRecord {
    /// VMs the host permits for this device, in the host's order.
    pub targets: Vec<VmId>,
    /// Current selection, possibly not yet confirmed by the host.
    pub selected: Option<VmId>,
    /// Last host-confirmed assignment.
    pub connected_to: Option<VmId>,
    /// Display-only vendor name; empty when the host sent none.
    pub vendor: String,
    /// Display-only product name; empty when the host sent none.
    pub product: String,
}

impl DeviceRecord {
    /// Builds a fresh record from a snapshot entry and its mount, if any.
    ///
    /// Both `selected` and `connected_to` start at the mount.
    pub fn from_snapshot(meta: &DeviceMeta, mount: Option<&VmId>) -> Self {
        Self {
            targets: meta.permitted_vms.clone(),
            selected: mount.cloned(),
            connected_to: mount.cloned(),
            vendor: meta.vendor.clone().unwrap_or_default(),
            product: meta.product.clone().unwrap_or_default(),
        }
    }

    /// The value written back as this device's mount: the confirmed
    /// assignment, else the selection.
    pub fn effective_mount(&self) -> Option<&VmId> {
        self.connected_to.as_ref().or(self.selected.as_ref())
    }
}

/// All devices the guest currently knows, ordered by device id.
#[derive(Debug, Default)]
pub struct Registry {
    devices: BTreeMap<DeviceId, DeviceRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(device_id)
    }

    pub fn get_mut(&mut self, device_id: &str) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Inserts or replaces a record, returning the previous one.
    pub fn insert(&mut self, device_id: DeviceId, record: DeviceRecord) -> Option<DeviceRecord> {
        self.devices.insert(device_id, record)
    }

    pub fn remove(&mut self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.remove(device_id)
    }

    /// Device ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.devices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &DeviceRecord)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Sorted copy of every record, for listings.
    pub fn snapshot(&self) -> Vec<(DeviceId, DeviceRecord)> {
        self.devices
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Device → VM table for persisting.  Devices with neither a confirmed
    /// assignment nor a selection are left out.
    pub fn mounts(&self) -> BTreeMap<DeviceId, VmId> {
        self.devices
            .iter()
            .filter_map(|(id, record)| record.effective_mount().map(|vm| (id.clone(), vm.clone())))
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
