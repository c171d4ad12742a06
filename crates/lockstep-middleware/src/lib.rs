//! `lockstep-middleware` – status plumbing
//!
//! Carries the controller's state to every reader without letting readers
//! touch the controller.
//!
//! # Modules
//!
//! - [`broadcaster`] – single-writer, many-reader [`Snapshot`][lockstep_types::Snapshot]
//!   channel built on a Tokio `watch` channel.

pub mod broadcaster;

pub use broadcaster::{SnapshotReader, StatusBroadcaster};
