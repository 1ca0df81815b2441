//! Per-node chat transcripts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{NodeId, ThreadId};

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One transcript message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            timestamp: Utc::now(),
            content: content.into(),
        }
    }
}

/// An ordered conversation attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    pub node_id: NodeId,
    pub thread_id: ThreadId,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatThread {
    pub fn new(node_id: NodeId, thread_id: ThreadId) -> Self {
        let now = Utc::now();
        ChatThread {
            node_id,
            thread_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Timestamp of the newest message, if any.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.timestamp).max()
    }

    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            node_id: self.node_id.clone(),
            thread_id: self.thread_id.clone(),
            message_count: self.messages.len(),
            last_activity: self.last_activity(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing view of a thread, served from metadata alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub node_id: NodeId,
    pub thread_id: ThreadId,
    pub message_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn summary_tracks_last_activity() {
        let mut thread = ChatThread::new(NodeId::new("svc-1").unwrap(), ThreadId::new("t1").unwrap());
        assert_eq!(thread.summary().last_activity, None);

        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        thread.messages.push(Message {
            role: Role::User,
            timestamp: late,
            content: "add retries".into(),
        });
        thread.messages.push(Message {
            role: Role::Assistant,
            timestamp: early,
            content: "done".into(),
        });

        let summary = thread.summary();
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.last_activity, Some(late));
    }

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
