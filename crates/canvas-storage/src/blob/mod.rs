//! Blob Store Adapter.
//!
//! The [`BlobStore`] trait stores opaque byte payloads under slash-separated
//! keys. Code artifacts and chat transcripts live here; metadata rows only
//! reference them.
//!
//! Backends:
//! - [`memory::InMemoryBlobStore`] for tests and ephemeral sessions
//! - [`fs::FsBlobStore`] writing one file per key under a root directory

pub mod fs;
pub mod memory;

use std::sync::Arc;

use crate::error::StorageError;

/// The storage contract for blobs.
///
/// `put` replaces any existing payload. `get` of a missing key is `Ok(None)`
/// and `delete` of a missing key succeeds.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, bytes)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        (**self).delete(key)
    }
}
