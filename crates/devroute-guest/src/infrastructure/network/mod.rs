//! Network infrastructure for the guest application.
//!
//! Architecture:
//! - `ListenerEndpoint` binds a vsock or TCP address and serves at most one
//!   host connection at a time.
//! - Inbound messages are decoded and forwarded on an `mpsc` channel as
//!   [`TransportEvent`](crate::application::service::TransportEvent)s.
//! - Outbound messages go through the endpoint's
//!   [`GuestTransport`](crate::application::service::GuestTransport) impl.

pub mod listener;

pub use listener::{ListenerConfig, ListenerEndpoint};
