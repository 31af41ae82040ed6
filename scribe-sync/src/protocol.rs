//! JSON wire protocol between a client replica and the document authority.
//!
//! Every frame is a single JSON object with a `type` discriminator:
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────┐
//! │ type         │ payload                                      │
//! ├──────────────┼──────────────────────────────────────────────┤
//! │ INITIALIZE   │ document snapshot, role marker, error        │
//! │ UPDATE       │ document_id + content + version  (client)    │
//! │              │ document snapshot                (authority) │
//! │ UNDO / REDO  │ same shape as UPDATE                         │
//! │ IMAGE_ADD    │ document_id + image (+ version)              │
//! │ IMAGE_REMOVE │ document_id + image_id (+ version)           │
//! │ name_update  │ document_id + name (+ version)               │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Inbound frames are parsed exactly once, at the transport boundary.
//! Anything that does not match one of the enumerated shapes becomes a
//! [`ProtocolError`] and never reaches the store.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Message kinds of the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full document snapshot on join
    Initialize,
    /// Content replacement
    Update,
    /// Undo request / authoritative undo result
    Undo,
    /// Redo request / authoritative redo result
    Redo,
    /// Image attached to the document
    ImageAdd,
    /// Image detached from the document
    ImageRemove,
    /// Title change
    NameUpdate,
}

impl MessageKind {
    /// The `type` discriminator used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "INITIALIZE",
            Self::Update => "UPDATE",
            Self::Undo => "UNDO",
            Self::Redo => "REDO",
            Self::ImageAdd => "IMAGE_ADD",
            Self::ImageRemove => "IMAGE_REMOVE",
            Self::NameUpdate => "name_update",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts either a JSON string or a JSON integer and yields a string.
///
/// The authority serializes database keys as integers in some payloads
/// and as strings in others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Identifier of a document on the authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_or_number(deserializer).map(Self)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for DocumentId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// A person with access to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

impl Collaborator {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// An image attached to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub alt: String,
}

impl Image {
    /// Create an image with a fresh random id.
    pub fn new(url: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            alt: alt.into(),
        }
    }

    /// Create with explicit id (for testing)
    pub fn with_id(id: impl Into<String>, url: impl Into<String>, alt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            alt: alt.into(),
        }
    }
}

/// Permission marker delivered by the authority on guest join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Writer,
    Reader,
    #[serde(other)]
    Unknown,
}

impl Role {
    /// Only writers may mutate a shared document.
    pub fn can_edit(self) -> bool {
        matches!(self, Role::Writer)
    }
}

/// Authoritative document state carried by inbound messages.
///
/// Every field except the id is optional; absent fields leave the local
/// replica untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<DocumentId>, content: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            content: Some(content.into()),
            title: None,
            version: Some(version),
        }
    }
}

/// Messages sent by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "INITIALIZE")]
    Initialize {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document: Option<DocumentSnapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "UPDATE")]
    Update { document: DocumentSnapshot },
    #[serde(rename = "UNDO")]
    Undo { document: DocumentSnapshot },
    #[serde(rename = "REDO")]
    Redo { document: DocumentSnapshot },
    #[serde(rename = "IMAGE_ADD")]
    ImageAdd {
        document_id: DocumentId,
        image: Image,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },
    #[serde(rename = "IMAGE_REMOVE")]
    ImageRemove {
        document_id: DocumentId,
        #[serde(deserialize_with = "string_or_number")]
        image_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },
    #[serde(rename = "name_update")]
    NameUpdate { document_id: DocumentId, name: String },
}

impl ServerMessage {
    /// Build a guest INITIALIZE.
    pub fn initialize(document: DocumentSnapshot, role: Role) -> Self {
        Self::Initialize {
            document: Some(document),
            role: Some(role),
            error: None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Initialize { .. } => MessageKind::Initialize,
            Self::Update { .. } => MessageKind::Update,
            Self::Undo { .. } => MessageKind::Undo,
            Self::Redo { .. } => MessageKind::Redo,
            Self::ImageAdd { .. } => MessageKind::ImageAdd,
            Self::ImageRemove { .. } => MessageKind::ImageRemove,
            Self::NameUpdate { .. } => MessageKind::NameUpdate,
        }
    }

    /// The document this message addresses, if any.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Self::Initialize { document, .. } => document.as_ref().map(|d| &d.id),
            Self::Update { document } | Self::Undo { document } | Self::Redo { document } => {
                Some(&document.id)
            }
            Self::ImageAdd { document_id, .. }
            | Self::ImageRemove { document_id, .. }
            | Self::NameUpdate { document_id, .. } => Some(document_id),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "UPDATE")]
    Update {
        document_id: DocumentId,
        content: String,
        version: u64,
    },
    /// `version` is the version the client currently sees; the target
    /// version is computed by the authority.
    #[serde(rename = "UNDO")]
    Undo {
        document_id: DocumentId,
        content: String,
        version: u64,
    },
    #[serde(rename = "REDO")]
    Redo {
        document_id: DocumentId,
        content: String,
        version: u64,
    },
    #[serde(rename = "name_update")]
    NameUpdate {
        document_id: DocumentId,
        name: String,
        version: u64,
    },
    #[serde(rename = "IMAGE_ADD")]
    ImageAdd {
        document_id: DocumentId,
        image: Image,
        version: u64,
    },
    #[serde(rename = "IMAGE_REMOVE")]
    ImageRemove {
        document_id: DocumentId,
        image_id: String,
        version: u64,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Update { .. } => MessageKind::Update,
            Self::Undo { .. } => MessageKind::Undo,
            Self::Redo { .. } => MessageKind::Redo,
            Self::NameUpdate { .. } => MessageKind::NameUpdate,
            Self::ImageAdd { .. } => MessageKind::ImageAdd,
            Self::ImageRemove { .. } => MessageKind::ImageRemove,
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        match self {
            Self::Update { document_id, .. }
            | Self::Undo { document_id, .. }
            | Self::Redo { document_id, .. }
            | Self::NameUpdate { document_id, .. }
            | Self::ImageAdd { document_id, .. }
            | Self::ImageRemove { document_id, .. } => document_id,
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Malformed message: {0}")]
    Decode(String),
}
