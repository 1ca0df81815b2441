//! Bounded retry for transient store faults.
//!
//! [`Retrying`] wraps any [`MetadataStore`] or [`BlobStore`] and repeats calls
//! that fail with [`StorageError::StoreConnection`], sleeping with exponential
//! backoff between attempts. Once the attempts are spent the last error is
//! reported as a non-retryable [`StorageError::Store`].

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::blob::BlobStore;
use crate::config::RetryPolicy;
use crate::error::StorageError;
use crate::metadata::{ItemKey, MetadataItem, MetadataStore, Table};

impl RetryPolicy {
    /// Runs `op`, retrying transient failures.
    pub fn run<T>(
        &self,
        op_name: &str,
        mut op: impl FnMut() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff();
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient store error, retrying"
                    );
                    thread::sleep(backoff);
                    backoff = next_backoff(backoff, self.max_backoff());
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(StorageError::Store(format!(
                        "{} failed after {} attempts: {}",
                        op_name, attempt, err
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// A store wrapper applying a [`RetryPolicy`] to every call.
#[derive(Debug, Clone)]
pub struct Retrying<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Retrying<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Retrying { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: MetadataStore> MetadataStore for Retrying<S> {
    fn get(&self, key: &ItemKey) -> Result<Option<MetadataItem>, StorageError> {
        self.policy.run("metadata get", || self.inner.get(key))
    }

    fn put(&self, item: &MetadataItem) -> Result<(), StorageError> {
        self.policy.run("metadata put", || self.inner.put(item))
    }

    fn delete(&self, key: &ItemKey) -> Result<(), StorageError> {
        self.policy.run("metadata delete", || self.inner.delete(key))
    }

    fn query_prefix(
        &self,
        table: Table,
        partition_key: &str,
        sort_prefix: &str,
    ) -> Result<Vec<MetadataItem>, StorageError> {
        self.policy.run("metadata query", || {
            self.inner.query_prefix(table, partition_key, sort_prefix)
        })
    }
}

impl<S: BlobStore> BlobStore for Retrying<S> {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.policy.run("blob put", || self.inner.put(key, bytes))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.policy.run("blob get", || self.inner.get(key))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.policy.run("blob delete", || self.inner.delete(key))
    }
}
