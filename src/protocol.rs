//! JSON wire protocol for operation sync.
//!
//! Every frame on the WebSocket is a UTF-8 JSON text envelope:
//! ```text
//! {"type": "operation", "delta": {...}}
//! {"type": "cursor",    "cursor": {...}}
//! {"type": "init",      "document": {...}}          (server → client, on join)
//! {"type": "error",     "reason": "...", "base_version": N}
//! ```
//!
//! A `Delta` is one client-authored transaction: an ordered list of
//! operations plus the document version the author was editing against.
//! Unused fields per operation type are omitted when serializing and
//! ignored when parsing.

use serde::{Deserialize, Serialize};

/// Envelope discriminator.
///
/// Unrecognized values deserialize to [`MessageKind::Unknown`] so the hub
/// can log and discard them without dropping the whole frame on the floor
/// as a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Server → client: document snapshot sent on registration.
    Init,
    /// An edit transaction (delta required).
    Operation,
    /// Presence update (cursor required). Never persisted.
    Cursor,
    /// Server → author: a rejected delta.
    Error,
    /// Reserved / future message types.
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Operation => "operation",
            Self::Cursor => "cursor",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kind = String::deserialize(deserializer)?;
        Ok(match kind.as_str() {
            "init" => Self::Init,
            "operation" => Self::Operation,
            "cursor" => Self::Cursor,
            "error" => Self::Error,
            _ => Self::Unknown,
        })
    }
}

/// A single atomic edit.
///
/// Positions are Unicode scalar-value offsets into the current content;
/// client and server must agree on this unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Splice `text` in at `pos`.
    Insert {
        pos: usize,
        #[serde(default)]
        text: String,
    },
    /// Remove `length` characters starting at `pos`.
    Delete {
        pos: usize,
        #[serde(default)]
        length: usize,
    },
    /// Placeholder with no content effect; exists only for transformation.
    Retain {
        pos: usize,
        #[serde(default)]
        length: usize,
    },
    /// An op type this server does not know. Parsed losslessly so the whole
    /// delta can be rejected at apply time instead of at the JSON layer.
    #[serde(other)]
    Unknown,
}

/// One client-authored transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Opaque author session id.
    pub client_id: String,
    /// The document version the author believed it was editing.
    ///
    /// Signed on the wire so a negative value is representable and can be
    /// rejected as `InvalidBaseVersion` rather than failing the parse.
    #[serde(rename = "version")]
    pub base_version: i64,
    pub ops: Vec<Operation>,
    /// Client wall clock in milliseconds. Informational only.
    #[serde(default)]
    pub timestamp: i64,
}

/// Presence information. Forwarded verbatim, never applied to content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub client_id: String,
    pub position: u64,
    #[serde(default)]
    pub name: String,
}

/// Document snapshot shape shared by the HTTP responses and the `init`
/// envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    pub content: String,
    pub version: u64,
}

/// Top-level wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
}

impl Envelope {
    /// Create an operation envelope.
    pub fn operation(delta: Delta) -> Self {
        Self {
            kind: MessageKind::Operation,
            delta: Some(delta),
            cursor: None,
            document: None,
            reason: None,
            base_version: None,
        }
    }

    /// Create a cursor envelope.
    pub fn cursor(cursor: Cursor) -> Self {
        Self {
            kind: MessageKind::Cursor,
            delta: None,
            cursor: Some(cursor),
            document: None,
            reason: None,
            base_version: None,
        }
    }

    /// Create an init envelope carrying the current document snapshot.
    pub fn init(document: DocumentInfo) -> Self {
        Self {
            kind: MessageKind::Init,
            delta: None,
            cursor: None,
            document: Some(document),
            reason: None,
            base_version: None,
        }
    }

    /// Create an error envelope reporting a rejected delta to its author.
    ///
    /// `version` is the document's current version so the author can
    /// resynchronize.
    pub fn error(reason: impl Into<String>, version: u64) -> Self {
        Self {
            kind: MessageKind::Error,
            delta: None,
            cursor: None,
            document: None,
            reason: Some(reason.into()),
            base_version: Some(version),
        }
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
