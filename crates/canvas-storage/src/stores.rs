//! The pair of backing stores every repository works against.

use std::sync::Arc;

use crate::blob::BlobStore;
use crate::config::RetryPolicy;
use crate::metadata::MetadataStore;
use crate::retry::Retrying;

/// Shared handles to the metadata and blob stores.
#[derive(Clone)]
pub struct Stores {
    pub metadata: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Stores {
    pub fn new(metadata: Arc<dyn MetadataStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Stores { metadata, blobs }
    }

    /// Wraps both stores in [`Retrying`] with `policy`.
    pub fn with_retry(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        policy: &RetryPolicy,
    ) -> Self {
        Stores {
            metadata: Arc::new(Retrying::new(metadata, policy.clone())),
            blobs: Arc::new(Retrying::new(blobs, policy.clone())),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
