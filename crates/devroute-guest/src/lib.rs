//! devroute-guest library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does devroute-guest do? (for beginners)
//!
//! The *guest* runs inside the VM that shows the device-routing UI.  It
//! never decides anything on its own: the host is the authority on which
//! devices exist and where each may go.  The guest:
//!
//! 1. Listens for the host (vsock in production, TCP in development) and
//!    accepts one connection at a time.
//! 2. Replaces its device registry with every *snapshot* the host pushes.
//! 3. Turns a user's choice of VM into a `selection` or `connect_change`
//!    request, marks the device *pending*, and waits for the host's `ack`.
//! 4. Commits the choice on `ack ok`; rolls it back on `ack error` or when no
//!    ack arrives within the timeout.
//!
//! A file-backed test transport replaces the host entirely for UI work: it
//! reads the schema from a JSON file and approves every request at once.

/// Application layer: registry, reconciler, routing table, and the dispatcher.
pub mod application;

/// Infrastructure layer: listener endpoint, file transport, config, console.
pub mod infrastructure;
