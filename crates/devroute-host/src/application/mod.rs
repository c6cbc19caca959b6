//! Application layer use cases for the host.
//!
//! # Sub-modules
//!
//! - **`authorize`** – The pure decision function: may this device go to
//!   that VM?  No I/O, no state, same answer for the same inputs.
//!
//! - **`host_session`** – Reacts to connection events from the dialer.
//!   Pushes the snapshot on connect and turns each inbound request into an
//!   `ack` through the [`host_session::MessageSink`] abstraction, so it can be
//!   tested without a socket.

pub mod authorize;
pub mod host_session;
