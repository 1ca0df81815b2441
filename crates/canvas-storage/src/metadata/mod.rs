//! Metadata Store Adapter.
//!
//! The [`MetadataStore`] trait is the contract every metadata backend
//! implements: point get/put/delete addressed by (table, partition key, sort
//! key) and a prefix query over sort keys within one partition. Items carry
//! their row body as opaque bytes; repositories own the encoding.
//!
//! Backends:
//! - [`memory::InMemoryMetadataStore`] for tests and ephemeral sessions
//! - [`sqlite::SqliteMetadataStore`] for durable single-node deployments

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Logical table an item belongs to. Entity ids of different kinds never
/// collide because each kind lives in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Canvases,
    Nodes,
    Edges,
    ChatThreads,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Canvases, Table::Nodes, Table::Edges, Table::ChatThreads];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Canvases => "canvases",
            Table::Nodes => "nodes",
            Table::Edges => "edges",
            Table::ChatThreads => "chat_threads",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full address of a metadata item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub table: Table,
    pub partition_key: String,
    pub sort_key: String,
}

impl ItemKey {
    pub fn new(table: Table, partition_key: impl Into<String>, sort_key: impl Into<String>) -> Self {
        ItemKey {
            table,
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.table, self.partition_key, self.sort_key)
    }
}

/// A metadata row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataItem {
    pub key: ItemKey,
    pub body: Vec<u8>,
}

impl MetadataItem {
    pub fn new(key: ItemKey, body: Vec<u8>) -> Self {
        MetadataItem { key, body }
    }
}

/// The storage contract for metadata rows.
///
/// Implementations must be safe to share across threads. `query_prefix`
/// makes no ordering promise; callers sort when they need an order.
/// Deleting an absent item succeeds.
pub trait MetadataStore: Send + Sync {
    fn get(&self, key: &ItemKey) -> Result<Option<MetadataItem>, StorageError>;

    fn put(&self, item: &MetadataItem) -> Result<(), StorageError>;

    fn delete(&self, key: &ItemKey) -> Result<(), StorageError>;

    fn query_prefix(
        &self,
        table: Table,
        partition_key: &str,
        sort_prefix: &str,
    ) -> Result<Vec<MetadataItem>, StorageError>;
}

impl<T: MetadataStore + ?Sized> MetadataStore for Arc<T> {
    fn get(&self, key: &ItemKey) -> Result<Option<MetadataItem>, StorageError> {
        (**self).get(key)
    }

    fn put(&self, item: &MetadataItem) -> Result<(), StorageError> {
        (**self).put(item)
    }

    fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        (**self).delete(key)
    }

    fn query_prefix(
        &self,
        table: Table,
        partition_key: &str,
        sort_prefix: &str,
    ) -> Result<Vec<MetadataItem>, StorageError> {
        (**self).query_prefix(table, partition_key, sort_prefix)
    }
}
