//! The host schema: devices, permitted VMs, and current mounts.
//!
//! The host loads this document once at startup from a JSON file:
//!
//! ```json
//! {
//!   "devices": {
//!     "046d:c52b": { "permitted_vms": ["work", "media"], "Vendor": "Logitech", "Product": "Receiver" }
//!   },
//!   "current-mount": { "046d:c52b": "work" }
//! }
//! ```
//!
//! # Normalization
//!
//! The file format is deliberately forgiving at the top level: a missing
//! `devices` or `current-mount` key (or a `null` document) means "empty".
//! What is *not* forgiven is a wrong shape: if either key holds something
//! other than a JSON object after defaulting, loading fails with
//! [`SchemaError::InvalidShape`] so the host never starts with a schema it
//! cannot interpret.
//!
//! Per-device fields the router does not understand are kept in
//! [`DeviceMeta::extra`] and written back out unchanged, so a snapshot carries
//! the device entries exactly as the host file described them.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Stable device identifier in `vendor:product` form, e.g. `"046d:c52b"`.
pub type DeviceId = String;

/// Identifier of a virtual machine that can receive a device.
pub type VmId = String;

/// JSON key holding the device table.
pub const DEVICES_KEY: &str = "devices";

/// JSON key holding the current device → VM assignments.
pub const CURRENT_MOUNT_KEY: &str = "current-mount";

/// Errors produced while loading or normalizing a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document is valid JSON but has the wrong shape.
    #[error("invalid schema JSON: {0}")]
    InvalidShape(String),

    /// The document is not valid JSON, or a device entry has mistyped fields.
    #[error("failed to parse schema JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Description of one device as announced by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMeta {
    /// VMs this device may be attached to, in display order.
    #[serde(default)]
    pub permitted_vms: Vec<VmId>,

    /// Human-readable vendor name (display only).
    #[serde(rename = "Vendor", default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,

    /// Human-readable product name (display only).
    #[serde(rename = "Product", default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,

    /// Any other fields present in the host file, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceMeta {
    /// Creates a device entry with the given permitted VMs and no display names.
    pub fn with_targets<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<VmId>,
    {
        Self {
            permitted_vms: targets.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// The host's full authoritative state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Every known device keyed by device id.
    #[serde(default)]
    pub devices: BTreeMap<DeviceId, DeviceMeta>,

    /// Current device → VM assignments.  Devices without an entry are unmounted.
    #[serde(
        rename = "current-mount",
        default,
        deserialize_with = "deserialize_mounts"
    )]
    pub current_mount: BTreeMap<DeviceId, VmId>,
}

impl Schema {
    /// Parses and normalizes a schema from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] for malformed JSON and
    /// [`SchemaError::InvalidShape`] for a document of the wrong shape.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let doc: Value = serde_json::from_str(text)?;
        Self::from_value(doc)
    }

    /// Normalizes an already-parsed JSON document into a [`Schema`].
    ///
    /// # Errors
    ///
    /// See [`normalize`].
    pub fn from_value(doc: Value) -> Result<Self, SchemaError> {
        let normalized = normalize(doc)?;
        Ok(serde_json::from_value(normalized)?)
    }

    /// Returns the permitted VMs for `device_id`, or `None` for an unknown device.
    pub fn permitted_targets(&self, device_id: &str) -> Option<&[VmId]> {
        self.devices
            .get(device_id)
            .map(|meta| meta.permitted_vms.as_slice())
    }
}

/// Applies the top-level defaults and shape checks to a raw JSON document.
///
/// Keys other than `devices` and `current-mount` are preserved, which lets the
/// guest's test-mode file transport rewrite `current-mount` without losing
/// anything else the user put in the file.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidShape`] if the document is neither `null` nor
/// an object, or if `devices` / `current-mount` is present but not an object.
pub fn normalize(doc: Value) -> Result<Value, SchemaError> {
    let mut object = match doc {
        Value::Null => Map::new(),
        Value::Object(object) => object,
        other => {
            return Err(SchemaError::InvalidShape(format!(
                "expected a JSON object at the top level, found {}",
                json_kind(&other)
            )))
        }
    };

    for key in [DEVICES_KEY, CURRENT_MOUNT_KEY] {
        let entry = object
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            return Err(SchemaError::InvalidShape(format!(
                "expected '{DEVICES_KEY}' and '{CURRENT_MOUNT_KEY}' objects, \
                 but '{key}' is {}",
                json_kind(entry)
            )));
        }
    }

    Ok(Value::Object(object))
}

/// Deserializes a mount table, treating `null` values (and a `null` table) as
/// "not mounted".
///
/// # Errors
///
/// Propagates the deserializer's error for anything that is not a map of
/// optional strings.
pub fn deserialize_mounts<'de, D>(deserializer: D) -> Result<BTreeMap<DeviceId, VmId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<DeviceId, Option<VmId>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(device_id, vm)| vm.map(|vm| (device_id, vm)))
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
