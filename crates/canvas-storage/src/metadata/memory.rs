//! In-memory implementation of [`MetadataStore`].
//!
//! [`InMemoryMetadataStore`] is a first-class backend for tests and ephemeral
//! sessions. Rows live in a `DashMap` keyed by [`ItemKey`]; prefix queries scan
//! the map.

use dashmap::DashMap;

use super::{ItemKey, MetadataItem, MetadataStore, Table};
use crate::error::StorageError;

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    items: DashMap<ItemKey, Vec<u8>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows across all tables.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn get(&self, key: &ItemKey) -> Result<Option<MetadataItem>, StorageError> {
        Ok(self
            .items
            .get(key)
            .map(|body| MetadataItem::new(key.clone(), body.value().clone())))
    }

    fn put(&self, item: &MetadataItem) -> Result<(), StorageError> {
        self.items.insert(item.key.clone(), item.body.clone());
        Ok(())
    }

    fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        self.items.remove(key);
        Ok(())
    }

    fn query_prefix(
        &self,
        table: Table,
        partition_key: &str,
        sort_prefix: &str,
    ) -> Result<Vec<MetadataItem>, StorageError> {
        Ok(self
            .items
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.table == table
                    && key.partition_key == partition_key
                    && key.sort_key.starts_with(sort_prefix)
            })
            .map(|entry| MetadataItem::new(entry.key().clone(), entry.value().clone()))
            .collect())
    }
}
