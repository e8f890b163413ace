//! # clipsync-types
//!
//! Wire format types for the clipsync multi-device clipboard protocol.
//!
//! This crate provides the foundational types shared by the server and any
//! Rust clients:
//! - [`ItemId`], [`ConnectionId`], [`DeviceId`] - Identity types
//! - [`Item`], [`ItemKind`] - The clipboard item model
//! - [`Inbound`], [`Outbound`] - Protocol envelopes (one JSON message per
//!   logical event)
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod item;

pub use envelope::{
    ConnectionInfo, ConnectionStats, ContentQuery, DecodeError, Inbound, Outbound, SyncPayload,
};
pub use error::TypesError;
pub use ids::{ConnectionId, DeviceId, ItemId};
pub use item::{Item, ItemKind};
