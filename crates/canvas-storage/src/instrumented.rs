//! Instrumented adapters for tests.
//!
//! Wrappers around any store that count writes or inject faults:
//! - [`CountingMetadataStore`], [`CountingBlobStore`]: count puts and deletes
//! - [`FlakyMetadataStore`]: fails the first calls with a connection error
//! - [`FailingBlobStore`]: fails every put once a write budget is spent

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::blob::BlobStore;
use crate::error::StorageError;
use crate::metadata::{ItemKey, MetadataItem, MetadataStore, Table};

#[derive(Debug, Default)]
pub struct CountingMetadataStore<S> {
    inner: S,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl<S> CountingMetadataStore<S> {
    pub fn new(inner: S) -> Self {
        CountingMetadataStore {
            inner,
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Puts plus deletes.
    pub fn writes(&self) -> usize {
        self.puts() + self.deletes()
    }
}

impl<S: MetadataStore> MetadataStore for CountingMetadataStore<S> {
    fn get(&self, key: &ItemKey) -> Result<Option<MetadataItem>, StorageError> {
        self.inner.get(key)
    }

    fn put(&self, item: &MetadataItem) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(item)
    }

    fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn query_prefix(
        &self,
        table: Table,
        partition_key: &str,
        sort_prefix: &str,
    ) -> Result<Vec<MetadataItem>, StorageError> {
        self.inner.query_prefix(table, partition_key, sort_prefix)
    }
}

#[derive(Debug, Default)]
pub struct CountingBlobStore<S> {
    inner: S,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl<S> CountingBlobStore<S> {
    pub fn new(inner: S) -> Self {
        CountingBlobStore {
            inner,
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.puts() + self.deletes()
    }
}

impl<S: BlobStore> BlobStore for CountingBlobStore<S> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, bytes)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }
}

/// Fails the first `failures` calls of any kind with
/// [`StorageError::StoreConnection`], then delegates.
#[derive(Debug)]
pub struct FlakyMetadataStore<S> {
    inner: S,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl<S> FlakyMetadataStore<S> {
    pub fn new(inner: S, failures: usize) -> Self {
        FlakyMetadataStore {
            inner,
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn trip(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tripped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StorageError::StoreConnection("injected connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<S: MetadataStore> MetadataStore for FlakyMetadataStore<S> {
    fn get(&self, key: &ItemKey) -> Result<Option<MetadataItem>, StorageError> {
        self.trip()?;
        self.inner.get(key)
    }

    fn put(&self, item: &MetadataItem) -> Result<(), StorageError> {
        self.trip()?;
        self.inner.put(item)
    }

    fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        self.trip()?;
        self.inner.delete(key)
    }

    fn query_prefix(
        &self,
        table: Table,
        partition_key: &str,
        sort_prefix: &str,
    ) -> Result<Vec<MetadataItem>, StorageError> {
        self.trip()?;
        self.inner.query_prefix(table, partition_key, sort_prefix)
    }
}

/// Accepts `budget` puts, then fails every further put with a
/// non-retryable [`StorageError::Store`]. Reads and deletes pass through.
#[derive(Debug)]
pub struct FailingBlobStore<S> {
    inner: S,
    budget: AtomicUsize,
}

impl<S> FailingBlobStore<S> {
    pub fn new(inner: S, budget: usize) -> Self {
        FailingBlobStore {
            inner,
            budget: AtomicUsize::new(budget),
        }
    }
}

impl<S: BlobStore> BlobStore for FailingBlobStore<S> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let allowed = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StorageError::Store(format!("injected write failure for '{}'", key)));
        }
        self.inner.put(key, bytes)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key)
    }
}
