//! Domain entities for the device router.
//!
//! This module contains pure data types with no infrastructure dependencies.
//!
//! # What lives here?
//!
//! - **`schema`** – The host's authoritative description of devices, the VMs
//!   each device may be attached to, and the current attachments.  The same
//!   shape is used for the host's JSON input file, for the guest's test-mode
//!   file, and for the body of every `snapshot` message.
//!
//! - **`address`** – Where a stream endpoint listens or connects: a vsock
//!   `(cid, port)` pair in production, a TCP socket address in development.

pub mod address;
pub mod schema;
