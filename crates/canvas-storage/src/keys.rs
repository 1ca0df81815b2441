//! Key conventions shared by every repository.
//!
//! Metadata rows:
//! - partition key `{customer}#{canvas_id}`
//! - sort key `{version}#{entity_id}` for nodes, edges and chat threads
//!   (a chat thread's entity id is `{node_id}#{thread_id}`)
//! - sort key `{version}` for the canvas row itself
//!
//! Blobs:
//! - `{customer}/{canvas_id}/{version}/{node_id}/code.{ext}`
//! - `{customer}/{canvas_id}/{version}/{node_id}/message_history.json`
//!
//! Identifiers cannot contain `#` or `/`, so every key splits unambiguously.

use canvas_core::id::{CanvasId, CustomerId, NodeId, ThreadId, VersionId};
use canvas_core::{CanvasScope, Language};

pub(crate) const SEPARATOR: char = '#';
pub(crate) const MESSAGE_HISTORY: &str = "message_history.json";

pub fn partition_key(customer: &CustomerId, canvas: &CanvasId) -> String {
    format!("{}{}{}", customer, SEPARATOR, canvas)
}

/// Sort key of an entity row.
pub fn sort_key(version: &VersionId, entity_id: &str) -> String {
    format!("{}{}{}", version, SEPARATOR, entity_id)
}

/// Prefix matching every entity row of one version.
pub fn version_prefix(version: &VersionId) -> String {
    format!("{}{}", version, SEPARATOR)
}

/// Sort key of the canvas row of one version.
pub fn canvas_sort_key(version: &VersionId) -> String {
    version.to_string()
}

/// Entity id of a chat thread row.
pub fn thread_entity_id(node: &NodeId, thread: &ThreadId) -> String {
    format!("{}{}{}", node, SEPARATOR, thread)
}

/// Prefix matching every chat thread row of one node.
pub fn node_threads_prefix(version: &VersionId, node: &NodeId) -> String {
    format!("{}{}{}{}", version, SEPARATOR, node, SEPARATOR)
}

/// Splits a sort key into `(version, entity_id)`.
pub fn split_sort_key(sort_key: &str) -> Option<(&str, &str)> {
    sort_key.split_once(SEPARATOR)
}

pub fn node_blob_prefix(scope: &CanvasScope, node: &NodeId) -> String {
    format!(
        "{}/{}/{}/{}/",
        scope.customer, scope.canvas, scope.version, node
    )
}

pub fn code_blob_key(scope: &CanvasScope, node: &NodeId, language: &Language) -> String {
    format!("{}code.{}", node_blob_prefix(scope, node), language.extension())
}

pub fn history_blob_key(scope: &CanvasScope, node: &NodeId) -> String {
    format!("{}{}", node_blob_prefix(scope, node), MESSAGE_HISTORY)
}
