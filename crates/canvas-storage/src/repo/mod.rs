//! Entity repositories.
//!
//! Each repository combines the metadata and blob adapters for one entity
//! kind. Every write path starts with
//! [`validate_version_mutable`](crate::version::validate_version_mutable), so
//! callers that bypass the coordinator are still held to the draft-only rule.
//!
//! - [`node::NodeRepository`]: node rows plus one code blob per language
//! - [`edge::EdgeRepository`]: edge rows
//! - [`thread::ThreadRepository`]: thread rows plus the node transcript blob
//! - [`canvas::CanvasRepository`]: whole-canvas reads and saves

pub mod canvas;
pub mod edge;
pub mod node;
pub mod thread;

use canvas_core::CanvasScope;

use crate::keys;
use crate::metadata::{ItemKey, Table};

pub use canvas::CanvasRepository;
pub use edge::EdgeRepository;
pub use node::NodeRepository;
pub use thread::ThreadRepository;

/// Metadata key of an entity row in `scope`.
pub(crate) fn entity_key(table: Table, scope: &CanvasScope, entity_id: &str) -> ItemKey {
    ItemKey::new(
        table,
        keys::partition_key(&scope.customer, &scope.canvas),
        keys::sort_key(&scope.version, entity_id),
    )
}

pub(crate) fn scope_partition(scope: &CanvasScope) -> String {
    keys::partition_key(&scope.customer, &scope.canvas)
}

/// Entity id part of a row's sort key.
pub(crate) fn entity_id_of(key: &ItemKey) -> Option<&str> {
    keys::split_sort_key(&key.sort_key).map(|(_, id)| id)
}
