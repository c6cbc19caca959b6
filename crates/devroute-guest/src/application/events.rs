//! Events the guest service publishes to its UI.

use devroute_core::{DeviceId, RequestId};

use crate::application::registry::DeviceRecord;

/// A change the UI should reflect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestEvent {
    /// A device appeared in a snapshot.
    DeviceAdded { id: DeviceId, record: DeviceRecord },
    /// A known device's record changed (snapshot, request start, or resolution).
    ///
    /// Also re-sent unchanged when a user action is rejected, so the UI can
    /// put its control back to the current selection.
    DeviceUpdated { id: DeviceId, record: DeviceRecord },
    /// A device disappeared from a snapshot.
    DeviceRemoved { id: DeviceId },
    /// The link to the host came up (`true`) or went down (`false`).
    ConnectionStateChanged(bool),
    /// A pending request finished, one way or the other.
    RequestResolved {
        request_id: RequestId,
        device_id: DeviceId,
        ok: bool,
        /// Host reason, `"no ACK from host"`, or `"failed to send: …"`.
        message: String,
    },
}
