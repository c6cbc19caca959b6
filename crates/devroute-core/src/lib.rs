//! # devroute-core
//!
//! Shared library for the device router containing the wire protocol, the
//! newline-delimited JSON codec, and the host schema model.
//!
//! This crate is used by both the host and the guest applications.
//! It never opens a socket: the channel types in [`protocol::channel`] work
//! over any `AsyncRead`/`AsyncWrite` half handed to them by the caller.
//!
//! # Architecture overview (for beginners)
//!
//! The device router decides which virtual machine a physical USB device
//! (identified by `vendor:product`) is attached to.  Two processes cooperate:
//!
//! - The **host** owns the truth: which devices exist and which VMs each one
//!   may be given.  It dials the guest and pushes that truth as a *snapshot*.
//! - The **guest** runs inside the VM that shows the user interface.  It
//!   listens for the host, keeps a registry of devices, and sends a *request*
//!   whenever the user picks a new VM.  The host answers every request with
//!   an *ack* that either approves or denies it.
//!
//! This crate (`devroute-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How messages travel over the stream.  Every message is
//!   one JSON object on one line, terminated by `\n`.
//!
//! - **`domain`** – Pure data with no I/O: the host schema (devices, permitted
//!   VMs, current mounts) and the stream addresses both sides connect to.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `devroute_core::Message` instead of `devroute_core::protocol::messages::Message`.
pub use domain::address::{AddressParseError, StreamAddress, DEFAULT_VSOCK_PORT};
pub use domain::schema::{DeviceId, DeviceMeta, Schema, SchemaError, VmId};
pub use protocol::channel::{split_stream, ChannelError, MessageReader, MessageWriter};
pub use protocol::codec::{encode_line, DecodeReport, FrameError, LineDecoder};
pub use protocol::messages::{
    unix_timestamp, AckMessage, AckStatus, ChangeRequest, Message, RequestId, RequestKind,
    SnapshotMessage,
};
