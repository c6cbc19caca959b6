//! Infrastructure layer for the guest application.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `devroute_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – The vsock/TCP listener the host dials into.
//!
//! - **`file_test`** – A transport that plays the host from a local JSON
//!   file, for working on the guest without a host.
//!
//! - **`storage`** – Loads the TOML config file.
//!
//! - **`console`** – The line-oriented stdin UI of the guest binary.

pub mod console;
pub mod file_test;
pub mod network;
pub mod storage;
