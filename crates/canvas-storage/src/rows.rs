//! Persisted row shapes and their JSON encoding.
//!
//! Domain types from canvas-core are split into a metadata row plus blobs:
//! a [`Node`]'s code moves to one blob per language and is replaced in the
//! row by a [`CodeRef`]; a [`ChatThread`]'s messages move into the node's
//! shared [`TranscriptDocument`] and the row keeps only the summary fields.
//! Edges are stored as-is.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use canvas_core::id::{NodeId, ThreadId};
use canvas_core::{ChatThread, Language, Message, NodeType, Position, ThreadSummary};

use crate::error::StorageError;

/// Row of the canvases table, one per version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasRow {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pointer from a node row to one code blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRef {
    pub key: String,
    /// blake3 hex digest of the blob bytes.
    pub digest: String,
    pub len: u64,
}

impl CodeRef {
    pub fn for_bytes(key: String, bytes: &[u8]) -> Self {
        CodeRef {
            key,
            digest: digest(bytes),
            len: bytes.len() as u64,
        }
    }

    /// Whether `bytes` are the payload this reference was made for.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        self.len == bytes.len() as u64 && self.digest == digest(bytes)
    }
}

/// Row of the nodes table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: NodeId,
    pub node_type: NodeType,
    pub position: Position,
    pub config: serde_json::Value,
    #[serde(default)]
    pub code: BTreeMap<Language, CodeRef>,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: SmallVec<[NodeId; 4]>,
}

/// Row of the chat_threads table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRow {
    pub node_id: NodeId,
    pub thread_id: ThreadId,
    pub message_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Blob holding the node's transcript document.
    pub history_key: String,
}

impl ThreadRow {
    pub fn from_thread(thread: &ChatThread, history_key: String) -> Self {
        ThreadRow {
            node_id: thread.node_id.clone(),
            thread_id: thread.thread_id.clone(),
            message_count: thread.messages.len(),
            last_activity: thread.last_activity(),
            created_at: thread.created_at,
            updated_at: thread.updated_at,
            history_key,
        }
    }

    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            node_id: self.node_id.clone(),
            thread_id: self.thread_id.clone(),
            message_count: self.message_count,
            last_activity: self.last_activity,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn into_thread(self, messages: Vec<Message>) -> ChatThread {
        ChatThread {
            node_id: self.node_id,
            thread_id: self.thread_id,
            messages,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Contents of a node's `message_history.json`: every thread of the node,
/// keyed by thread id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    #[serde(default)]
    pub threads: BTreeMap<ThreadId, Vec<Message>>,
}

/// blake3 hex digest of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a stored payload. Failures are reported as corruption of `key`.
pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::corrupted(key, e))
}
