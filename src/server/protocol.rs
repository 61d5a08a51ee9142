//! Protocol message definitions
//!
//! Defines the single message shape exchanged between editor clients and the server.
//! Every frame carries one JSON object of the form `{"type": ..., "content": ...}`.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Message type that triggers a completion reply
pub const COMPLETION_TYPE: &str = "completion";

/// Content returned for every completion request
pub const CANNED_COMPLETION: &str = "xxx";

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Message
// ============================================================================

/// A single protocol message
///
/// Immutable once built: a fresh value is decoded from every incoming frame
/// and a fresh value is built for every outgoing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    kind: String,
    /// Text payload
    #[serde(default, deserialize_with = "null_as_empty")]
    content: String,
}

/// Treat an explicit JSON `null` the same as an absent field
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Message {
    /// Create a message with an arbitrary type
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
        }
    }

    /// Create a completion message
    pub fn completion(content: impl Into<String>) -> Self {
        Self::new(COMPLETION_TYPE, content)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Check if this is a completion request
    pub fn is_completion(&self) -> bool {
        self.kind == COMPLETION_TYPE
    }

    /// Parse a message from a text frame
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a message from a binary frame
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
