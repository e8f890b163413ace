//! # clipsync-server
//!
//! Live fan-out and retention server for clipsync.
//!
//! This crate implements a WebSocket server that:
//! - Admits device connections and tracks their liveness
//! - Relays clipboard items and deletion notices between devices
//! - Answers queries over the stored item set
//! - Evicts items and their blobs per a configured retention policy
//! - Reconciles the item store and the blob store after partial failures
//!
//! ## Architecture
//!
//! ```text
//! Device A ──┐                    ┌── Device B
//!            │  WebSocket (JSON)  │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │       clipsync-server      │
//!        │  ┌──────────┐ ┌─────────┐  │
//!        │  │  SQLite  │ │  blobs  │  │
//!        │  │  (items) │ │  (fs)   │  │
//!        │  └──────────┘ └─────────┘  │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! One JSON message per logical event on `/ws?deviceId=...`:
//! - `sync` without payload → full item list; with payload → relay to peers
//! - `delete` → deletion notice fan-out
//! - `get_all_text` / `get_all_images` / `get_latest` / `get_all_content`
//!   → query replies
//! - `ping` → `pong`
//! - `connection_stats` pushed on every admit and removal

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcast;
pub mod config;
pub mod error;
pub mod http;
pub mod reconcile;
pub mod registry;
pub mod retention;
pub mod server;
pub mod session;
pub mod storage;
pub mod sweep;
pub mod ws;

#[cfg(test)]
mod test_support;
