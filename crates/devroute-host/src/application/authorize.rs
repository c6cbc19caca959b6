//! Authorization of device → VM moves.
//!
//! A request is approved exactly when the target VM appears in the device's
//! `permitted_vms` list in the host schema.  The function is pure: the same
//! schema, device, and target always produce the same [`Decision`].

use devroute_core::Schema;

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the move is allowed.
    pub approved: bool,
    /// Human-readable reason for a denial.  Empty when approved.
    pub reason: String,
}

impl Decision {
    fn approve() -> Self {
        Self {
            approved: true,
            reason: String::new(),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            approved: false,
            reason,
        }
    }
}

/// Decides whether `device_id` may be attached to `target_vm`.
pub fn authorize(schema: &Schema, device_id: &str, target_vm: &str) -> Decision {
    let Some(permitted) = schema.permitted_targets(device_id) else {
        return Decision::deny(format!("Unknown device '{device_id}'"));
    };

    if permitted.iter().any(|vm| vm == target_vm) {
        Decision::approve()
    } else {
        Decision::deny(format!(
            "Target '{target_vm}' not permitted for '{device_id}'"
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
