//! Application layer for the guest.
//!
//! Everything here runs inside a single dispatcher task, so none of these
//! types need locks.
//!
//! # Sub-modules
//!
//! - **`registry`**  – The guest's view of every device: permitted targets,
//!   the current selection, and the last host-confirmed assignment.
//!
//! - **`events`**    – [`events::GuestEvent`], the typed stream a UI (or the
//!   console) subscribes to.
//!
//! - **`reconcile`** – Replaces the registry with the contents of a snapshot
//!   and reports what was added, updated, or removed.
//!
//! - **`routing`**   – The per-device request state machine: at most one
//!   pending request per device, commit on `ack ok`, rollback on error or
//!   timeout.
//!
//! - **`service`**   – The dispatcher task that ties the above to a
//!   [`service::GuestTransport`] and exposes a cloneable
//!   [`service::GuestHandle`] for user actions.

pub mod events;
pub mod reconcile;
pub mod registry;
pub mod routing;
pub mod service;
