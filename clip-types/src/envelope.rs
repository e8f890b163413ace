//! Protocol envelopes for clipsync.
//!
//! One JSON message per logical event, bidirectional. Every message carries
//! a `type` tag; the remaining fields depend on the variant. Dispatch is an
//! exhaustive match, so adding a message type is a compile-time-checked
//! change.

use crate::error::TypesError;
use crate::ids::{ConnectionId, DeviceId, ItemId};
use crate::item::{Item, ItemKind};
use serde::{Deserialize, Serialize};

/// Recognized inbound `type` values, used for error reporting.
const INBOUND_TYPES: &[&str] = &[
    "sync",
    "delete",
    "get_all_text",
    "get_all_images",
    "get_latest",
    "get_all_content",
    "ping",
];

/// A request received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Without payload: ask for the full current item list.
    /// With payload: relay the item to every other connection verbatim.
    Sync {
        /// Optional item payload to relay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Item>,
    },
    /// Announce a deletion performed via the HTTP write path.
    Delete {
        /// The deleted item.
        id: ItemId,
    },
    /// Query all text items.
    GetAllText,
    /// Query all image items.
    GetAllImages,
    /// Query the most recent N items.
    GetLatest {
        /// How many items to return; the server applies a default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
    /// Paginated, filtered query over all items.
    GetAllContent {
        /// Query filters; all fields optional.
        #[serde(default)]
        data: ContentQuery,
    },
    /// Application-level liveness probe.
    Ping,
}

/// How an inbound message failed to decode.
///
/// The distinction matters for error reporting: a malformed frame and an
/// unrecognized type produce different error events, but neither closes the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame was not valid JSON.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// The frame had no string `type` tag.
    #[error("message has no type field")]
    MissingType,
    /// The `type` tag is not a recognized request kind.
    #[error("unrecognized message type: {0}")]
    UnknownType(String),
    /// The tag was recognized but the payload fields were invalid.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// The recognized `type` tag.
        kind: String,
        /// What was wrong with the fields.
        reason: String,
    },
}

impl Inbound {
    /// Decode a request from a JSON text frame.
    ///
    /// Classifies failures so the server can answer with a typed error
    /// event instead of dropping the connection.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(DecodeError::MissingType)?;

        if !INBOUND_TYPES.contains(&kind) {
            return Err(DecodeError::UnknownType(kind.to_string()));
        }

        let kind = kind.to_string();
        serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }
}

/// Filters for `get_all_content`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    /// Maximum items to return; clamped server-side to a hard ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Offset into the newest-first ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// Restrict to a single item kind.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
}

/// The payload of an outbound `sync` event.
///
/// A single item when relaying, the full list when answering a payload-less
/// `sync` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncPayload {
    /// One relayed item.
    Item(Box<Item>),
    /// The full current item list.
    Items(Vec<Item>),
}

/// Membership statistics pushed to every connection on admit/remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Connections currently registered.
    pub active_connections: usize,
    /// Connections admitted since startup.
    pub total_connections: u64,
    /// One entry per live connection.
    pub connections: Vec<ConnectionInfo>,
}

/// One live connection in a stats broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Server-generated connection id.
    pub connection_id: ConnectionId,
    /// Client-supplied device id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
}

/// An event sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// A relayed item, or the full list in reply to a payload-less `sync`.
    Sync {
        /// Item or item list.
        data: SyncPayload,
    },
    /// An item was deleted.
    Delete {
        /// The deleted item.
        id: ItemId,
    },
    /// Reply to `get_all_text`.
    AllText {
        /// Matching items, newest first.
        data: Vec<Item>,
    },
    /// Reply to `get_all_images`.
    AllImages {
        /// Matching items, newest first.
        data: Vec<Item>,
    },
    /// Reply to `get_latest`.
    Latest {
        /// The most recent items, newest first.
        data: Vec<Item>,
        /// The effective count after defaulting.
        count: u32,
    },
    /// Reply to `get_all_content`.
    AllContent {
        /// One page of items, newest first.
        data: Vec<Item>,
        /// Human-readable summary.
        message: String,
        /// Total matching items, ignoring pagination.
        count: u64,
    },
    /// Membership statistics.
    ConnectionStats {
        /// Current registry snapshot.
        data: ConnectionStats,
    },
    /// A protocol or storage error scoped to the originating request.
    Error {
        /// What went wrong.
        message: String,
    },
    /// Reply to an application-level `ping`.
    Pong,
}

impl Outbound {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, TypesError> {
        serde_json::to_string(self).map_err(TypesError::Serialization)
    }
}
