//! JSON wire protocol between editors and the sync server.
//!
//! One JSON object per WebSocket text frame, discriminated by `type`:
//!
//! ```text
//! server → client                     client → server
//! ──────────────────────────────      ──────────────────────────────
//! user:connected                      user:cursor
//! user:disconnected                   user:operation
//! user:cursor                         document:sync
//! user:operation                      branch:config:snapshot
//! document:snapshot
//! operation:rejected
//! branch:config:snapshot
//! ```
//!
//! Outbound messages are encoded once into a shared [`Frame`] and the same
//! allocation is handed to every recipient.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use inkwell_ot::TextOperation;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A pre-encoded outbound message.
pub type Frame = Arc<str>;

/// Identifies one connection inside the server. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who is behind a connection. Opaque to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub avatar_url: String,
}

/// Caret position and selection end, in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub position: usize,
    pub selection_end: usize,
}

impl Cursor {
    pub fn caret(position: usize) -> Self {
        Self {
            position,
            selection_end: position,
        }
    }

    /// Clamp both ends into `0..=len`.
    pub fn clamped(self, len: usize) -> Self {
        Self {
            position: self.position.min(len),
            selection_end: self.selection_end.min(len),
        }
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "user:connected", rename_all = "camelCase")]
    UserConnected {
        session_id: ParticipantId,
        connected_at: DateTime<Utc>,
        user: UserIdentity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },

    #[serde(rename = "user:disconnected", rename_all = "camelCase")]
    UserDisconnected {
        session_id: ParticipantId,
        user: UserIdentity,
    },

    #[serde(rename = "user:cursor", rename_all = "camelCase")]
    UserCursor { user_id: String, cursor: Cursor },

    /// Join handshake / catch-up payload. `revision` is the revision of
    /// `document`; replaying `operations` on top of it yields the current
    /// document at `revision + operations.len()`.
    #[serde(rename = "document:snapshot")]
    DocumentSnapshot {
        revision: u64,
        document: TextOperation,
        operations: Vec<TextOperation>,
    },

    #[serde(rename = "user:operation", rename_all = "camelCase")]
    UserOperation {
        user_id: String,
        revision: u64,
        operation: TextOperation,
    },

    /// Sent to the submitter alone. `revision` is the unchanged current
    /// revision.
    #[serde(rename = "operation:rejected")]
    OperationRejected { revision: u64, reason: String },

    #[serde(rename = "branch:config:snapshot")]
    BranchConfigSnapshot { data: serde_json::Value },
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "user:cursor")]
    Cursor { cursor: Cursor },

    /// The operation stays as raw JSON here so that an undecodable operation
    /// is rejected as an edit instead of dropped as a malformed frame.
    #[serde(rename = "user:operation")]
    Operation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<u64>,
        operation: serde_json::Value,
    },

    #[serde(rename = "document:sync")]
    Sync { revision: u64 },

    #[serde(rename = "branch:config:snapshot")]
    BranchConfig { data: serde_json::Value },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Frame, ProtocolError> {
        let text = serde_json::to_string(self).map_err(ProtocolError::Serialization)?;
        Ok(Frame::from(text))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialization)
    }

    /// Build an edit submission from a typed operation.
    pub fn operation(revision: u64, operation: &TextOperation) -> Result<Self, ProtocolError> {
        let operation = serde_json::to_value(operation).map_err(ProtocolError::Serialization)?;
        Ok(Self::Operation {
            revision: Some(revision),
            operation,
        })
    }
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("malformed frame: {0}")]
    Deserialization(#[source] serde_json::Error),
}
