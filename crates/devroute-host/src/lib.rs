//! devroute-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does devroute-host do? (for beginners)
//!
//! The *host* is the privileged side of the device router.  It knows which
//! physical devices exist, which virtual machines each device may be attached
//! to, and where every device is attached right now.  All of that lives in a
//! JSON *schema* file loaded once at startup.
//!
//! The host application:
//!
//! 1. Dials the guest VM (over vsock in production, TCP in development) and
//!    keeps redialing whenever the connection drops.
//! 2. Pushes a full *snapshot* of the schema every time a connection comes up.
//! 3. Answers every `selection` / `connect_change` request from the guest with
//!    an `ack` that approves the move only if the target VM is on the device's
//!    permitted list.

/// Application layer: authorization and the host session use case.
pub mod application;

/// Infrastructure layer: the dialer endpoint and config/schema loading.
pub mod infrastructure;
