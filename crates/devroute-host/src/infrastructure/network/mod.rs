//! Network infrastructure for the host application.
//!
//! Architecture:
//! - `DialerEndpoint` owns at most one stream to the guest at a time.
//! - Inbound messages are decoded and forwarded on an `mpsc` channel as
//!   [`NetworkEvent`](crate::application::host_session::NetworkEvent)s.
//! - Outbound messages go through the endpoint's
//!   [`MessageSink`](crate::application::host_session::MessageSink) impl.

pub mod dialer;
pub mod stream;

pub use dialer::{DialerConfig, DialerEndpoint};
