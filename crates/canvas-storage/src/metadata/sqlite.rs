//! SQLite implementation of [`MetadataStore`].
//!
//! [`SqliteMetadataStore`] keeps every logical table in one `metadata_items`
//! table keyed by `(tbl, partition_key, sort_key)`. The connection sits behind
//! a mutex so the store can be shared with the promotion worker pool; every
//! call is a single statement, so no explicit transactions are needed.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::{ItemKey, MetadataItem, MetadataStore, Table};
use crate::error::StorageError;

/// SQLite-backed implementation of [`MetadataStore`].
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteMetadataStore {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteMetadataStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Store("sqlite connection mutex poisoned".to_string()))
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn get(&self, key: &ItemKey) -> Result<Option<MetadataItem>, StorageError> {
        let conn = self.conn()?;
        let body: Option<Vec<u8>> = conn
            .query_row(
                "SELECT body FROM metadata_items
                 WHERE tbl = ?1 AND partition_key = ?2 AND sort_key = ?3",
                params![key.table.as_str(), key.partition_key, key.sort_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body.map(|body| MetadataItem::new(key.clone(), body)))
    }

    fn put(&self, item: &MetadataItem) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO metadata_items (tbl, partition_key, sort_key, body)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (tbl, partition_key, sort_key) DO UPDATE SET body = excluded.body",
            params![
                item.key.table.as_str(),
                item.key.partition_key,
                item.key.sort_key,
                item.body
            ],
        )?;
        Ok(())
    }

    fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM metadata_items
             WHERE tbl = ?1 AND partition_key = ?2 AND sort_key = ?3",
            params![key.table.as_str(), key.partition_key, key.sort_key],
        )?;
        Ok(())
    }

    fn query_prefix(
        &self,
        table: Table,
        partition_key: &str,
        sort_prefix: &str,
    ) -> Result<Vec<MetadataItem>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT sort_key, body FROM metadata_items
             WHERE tbl = ?1 AND partition_key = ?2
               AND substr(sort_key, 1, length(?3)) = ?3
             ORDER BY sort_key",
        )?;
        let rows = stmt.query_map(params![table.as_str(), partition_key, sort_prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (sort_key, body) = row?;
            items.push(MetadataItem::new(
                ItemKey::new(table, partition_key, sort_key),
                body,
            ));
        }
        Ok(items)
    }
}
