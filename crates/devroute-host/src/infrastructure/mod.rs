//! Infrastructure layer for the host application.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `devroute_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – Opens vsock/TCP streams to the guest and runs the
//!   dialer loop: connect with a timeout, read messages until the stream
//!   closes, wait, dial again.
//!
//! - **`storage`** – Loads the TOML config file and the JSON schema file.

pub mod network;
pub mod storage;
