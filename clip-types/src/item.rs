//! The clipboard item model.

use crate::error::TypesError;
use crate::ids::{DeviceId, ItemId};
use serde::{Deserialize, Serialize};

/// The kind of content a clipboard item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Plain text, stored inline.
    Text,
    /// An image, backed by a blob in the upload store.
    Image,
    /// An arbitrary file, backed by a blob in the upload store.
    File,
}

impl ItemKind {
    /// String form used in the database and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::Image => "image",
            ItemKind::File => "file",
        }
    }

    /// Parse from the database/wire string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ItemKind::Text),
            "image" => Some(ItemKind::Image),
            "file" => Some(ItemKind::File),
            _ => None,
        }
    }

    /// Whether items of this kind reference a blob in the upload store.
    pub fn has_blob(&self) -> bool {
        !matches!(self, ItemKind::Text)
    }
}

/// A clipboard item shared between devices.
///
/// Field names on the wire are camelCase to match the envelope the original
/// web clients speak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Unique identifier.
    pub id: ItemId,
    /// Content kind.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Inline text for text items; display name or caption otherwise.
    pub content: String,
    /// Blob reference for file/image items (filename in the upload store).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<String>,
    /// Device that created the item, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    /// Declared payload size in bytes (file/image only).
    #[serde(rename = "fileSize", skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Creation time, unix milliseconds. RFC 3339 on the wire.
    #[serde(with = "wire_time")]
    pub created_at: i64,
    /// Last modification time, unix milliseconds. RFC 3339 on the wire.
    #[serde(with = "wire_time")]
    pub updated_at: i64,
}

/// Wire form for timestamps.
///
/// The clients exchange timestamps as RFC 3339 strings
/// (`2024-01-15T10:30:00.000Z`); internally and in storage they are unix
/// milliseconds.
mod wire_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(millis: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        let dt = DateTime::<Utc>::from_timestamp_millis(*millis)
            .ok_or_else(|| serde::ser::Error::custom(format!("timestamp out of range: {millis}")))?;
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.timestamp_millis())
            .map_err(serde::de::Error::custom)
    }
}

impl Item {
    /// Check the model invariant.
    ///
    /// File and image items carry a non-empty blob reference and a
    /// non-negative size; text items never reference the blob store.
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.kind.has_blob() {
            match &self.blob_ref {
                Some(r) if !r.is_empty() => {}
                _ => {
                    return Err(TypesError::InvalidItem(format!(
                        "{} item {} has no blob reference",
                        self.kind.as_str(),
                        self.id
                    )))
                }
            }
            if self.size.is_some_and(|s| s < 0) {
                return Err(TypesError::InvalidItem(format!(
                    "{} item {} has negative size",
                    self.kind.as_str(),
                    self.id
                )));
            }
        } else if self.blob_ref.is_some() {
            return Err(TypesError::InvalidItem(format!(
                "text item {} must not reference the blob store",
                self.id
            )));
        }
        Ok(())
    }
}
