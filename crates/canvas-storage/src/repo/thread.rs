//! Chat thread persistence.
//!
//! All threads of one node share the node's `message_history.json` blob, a
//! [`TranscriptDocument`] keyed by thread id. Each thread also has a small
//! [`ThreadRow`] with its message count and last activity, so listings never
//! read the transcript.
//!
//! Writes to one transcript are serialized by a per-blob lock shared by every
//! clone of the repository. The lock is process-local: writers in separate
//! processes still race on the read-modify-write of the shared blob.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use chrono::Utc;
use tracing::warn;

use canvas_core::id::{NodeId, ThreadId};
use canvas_core::{CanvasScope, ChatThread, Message, ThreadSummary};

use super::{entity_key, scope_partition};
use crate::error::StorageError;
use crate::keys;
use crate::metadata::{ItemKey, MetadataItem, Table};
use crate::rows::{decode, encode, ThreadRow, TranscriptDocument};
use crate::stores::Stores;
use crate::version::validate_version_mutable;

/// Lock of one transcript blob, keyed by blob key.
type TranscriptLocks = DashMap<String, Arc<Mutex<()>>>;

#[derive(Debug, Clone)]
pub struct ThreadRepository {
    stores: Stores,
    locks: Arc<TranscriptLocks>,
}

impl ThreadRepository {
    pub fn new(stores: Stores) -> Self {
        ThreadRepository {
            stores,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn key(scope: &CanvasScope, node: &NodeId, thread: &ThreadId) -> ItemKey {
        entity_key(
            Table::ChatThreads,
            scope,
            &keys::thread_entity_id(node, thread),
        )
    }

    /// Reads a thread with its messages. An unreadable transcript degrades
    /// to an empty message list.
    pub fn get(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
        thread: &ThreadId,
    ) -> Result<Option<ChatThread>, StorageError> {
        let key = Self::key(scope, node, thread);
        let Some(item) = self.stores.metadata.get(&key)? else {
            return Ok(None);
        };
        let row: ThreadRow = decode(&key.to_string(), &item.body)?;
        let mut document = self.read_transcript_lenient(&row.history_key);
        let messages = document.threads.remove(thread).unwrap_or_default();
        Ok(Some(row.into_thread(messages)))
    }

    /// Every thread of `node`, sorted by thread id.
    pub fn list(&self, scope: &CanvasScope, node: &NodeId) -> Result<Vec<ChatThread>, StorageError> {
        let rows = self.node_rows(scope, node)?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let mut document = self.read_transcript_lenient(&first.history_key);
        Ok(rows
            .into_iter()
            .map(|row| {
                let messages = document.threads.remove(&row.thread_id).unwrap_or_default();
                row.into_thread(messages)
            })
            .collect())
    }

    /// Thread summaries of `node` from metadata rows alone.
    pub fn list_summaries(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
    ) -> Result<Vec<ThreadSummary>, StorageError> {
        Ok(self
            .node_rows(scope, node)?
            .iter()
            .map(ThreadRow::summary)
            .collect())
    }

    /// Persists a thread into the draft, replacing its stored messages.
    ///
    /// The node's transcript blob is rewritten before the thread row.
    pub fn save(&self, scope: &CanvasScope, thread: &ChatThread) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        let history_key = keys::history_blob_key(scope, &thread.node_id);
        let lock = self.transcript_lock(&history_key);
        let _guard = Self::acquire(&lock)?;
        self.write_thread(scope, thread, history_key)
    }

    fn write_thread(
        &self,
        scope: &CanvasScope,
        thread: &ChatThread,
        history_key: String,
    ) -> Result<(), StorageError> {
        let mut document = self.read_transcript(&history_key)?.unwrap_or_default();
        document
            .threads
            .insert(thread.thread_id.clone(), thread.messages.clone());
        self.stores.blobs.put(&history_key, &encode(&document)?)?;

        let row = ThreadRow::from_thread(thread, history_key);
        let key = Self::key(scope, &thread.node_id, &thread.thread_id);
        self.stores
            .metadata
            .put(&MetadataItem::new(key, encode(&row)?))
    }

    /// Appends a message, creating the thread on first use.
    pub fn append_message(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
        thread: &ThreadId,
        message: Message,
    ) -> Result<ChatThread, StorageError> {
        validate_version_mutable(&scope.version)?;
        let history_key = keys::history_blob_key(scope, node);
        let lock = self.transcript_lock(&history_key);
        let _guard = Self::acquire(&lock)?;

        let mut current = match self.get(scope, node, thread)? {
            Some(existing) => existing,
            None => ChatThread::new(node.clone(), thread.clone()),
        };
        current.messages.push(message);
        current.updated_at = Utc::now();
        self.write_thread(scope, &current, history_key)?;
        Ok(current)
    }

    pub fn delete(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
        thread: &ThreadId,
    ) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;

        let history_key = keys::history_blob_key(scope, node);
        let lock = self.transcript_lock(&history_key);
        let _guard = Self::acquire(&lock)?;
        match self.read_transcript(&history_key) {
            Ok(Some(mut document)) => {
                document.threads.remove(thread);
                let rewritten = if document.threads.is_empty() {
                    self.stores.blobs.delete(&history_key)
                } else {
                    encode(&document).and_then(|bytes| self.stores.blobs.put(&history_key, &bytes))
                };
                if let Err(err) = rewritten {
                    warn!(key = %history_key, error = %err, "best-effort transcript update failed");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(key = %history_key, error = %err, "leaving unreadable transcript in place"),
        }
        self.stores.metadata.delete(&Self::key(scope, node, thread))
    }

    /// Removes every thread of `node` and its transcript blob, without the
    /// mutability guard.
    pub(crate) fn purge_node(&self, scope: &CanvasScope, node: &NodeId) -> Result<(), StorageError> {
        let lock = self.transcript_lock(&keys::history_blob_key(scope, node));
        let _guard = Self::acquire(&lock)?;
        let rows = self.node_rows(scope, node)?;
        let history_keys: BTreeSet<String> = rows
            .iter()
            .map(|row| row.history_key.clone())
            .chain(std::iter::once(keys::history_blob_key(scope, node)))
            .collect();
        for key in &history_keys {
            if let Err(err) = self.stores.blobs.delete(key) {
                warn!(key = %key, error = %err, "best-effort blob delete failed");
            }
        }
        for row in rows {
            self.stores
                .metadata
                .delete(&Self::key(scope, node, &row.thread_id))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn transcript_lock(&self, history_key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(history_key.to_string())
            .or_default()
            .clone()
    }

    fn acquire(lock: &Mutex<()>) -> Result<MutexGuard<'_, ()>, StorageError> {
        lock.lock()
            .map_err(|_| StorageError::Store("transcript lock poisoned".to_string()))
    }

    fn node_rows(&self, scope: &CanvasScope, node: &NodeId) -> Result<Vec<ThreadRow>, StorageError> {
        let items = self.stores.metadata.query_prefix(
            Table::ChatThreads,
            &scope_partition(scope),
            &keys::node_threads_prefix(&scope.version, node),
        )?;
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            match decode::<ThreadRow>(&item.key.to_string(), &item.body) {
                Ok(row) => rows.push(row),
                Err(err) => warn!(key = %item.key, error = %err, "skipping unreadable thread row"),
            }
        }
        rows.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        Ok(rows)
    }

    fn read_transcript(&self, key: &str) -> Result<Option<TranscriptDocument>, StorageError> {
        match self.stores.blobs.get(key)? {
            Some(bytes) => decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_transcript_lenient(&self, key: &str) -> TranscriptDocument {
        match self.read_transcript(key) {
            Ok(document) => document.unwrap_or_default(),
            Err(err) => {
                warn!(key = %key, error = %err, "transcript unreadable, returning no messages");
                TranscriptDocument::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::InMemoryBlobStore;
    use crate::blob::BlobStore;
    use crate::metadata::memory::InMemoryMetadataStore;
    use canvas_core::id::{CanvasId, CustomerId, VersionId};
    use canvas_core::Role;
    use std::sync::Arc;

    fn setup() -> (ThreadRepository, Arc<InMemoryBlobStore>) {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let repo = ThreadRepository::new(Stores::new(
            Arc::new(InMemoryMetadataStore::new()),
            blobs.clone(),
        ));
        (repo, blobs)
    }

    fn draft() -> CanvasScope {
        CanvasScope::draft(CustomerId::new("cust-1").unwrap(), CanvasId::new("c1").unwrap())
    }

    fn ids() -> (NodeId, ThreadId, ThreadId) {
        (
            NodeId::new("svc-1").unwrap(),
            ThreadId::new("t1").unwrap(),
            ThreadId::new("t2").unwrap(),
        )
    }

    #[test]
    fn test_append_creates_thread() {
        let (repo, blobs) = setup();
        let (node, t1, _) = ids();

        repo.append_message(&draft(), &node, &t1, Message::now(Role::User, "add caching"))
            .unwrap();
        let thread = repo
            .append_message(&draft(), &node, &t1, Message::now(Role::Assistant, "done"))
            .unwrap();
        assert_eq!(thread.messages.len(), 2);

        let loaded = repo.get(&draft(), &node, &t1).unwrap().unwrap();
        assert_eq!(loaded, thread);
        assert!(blobs.contains("cust-1/c1/draft/svc-1/message_history.json"));
    }

    #[test]
    fn test_threads_share_one_transcript() {
        let (repo, blobs) = setup();
        let (node, t1, t2) = ids();
        repo.append_message(&draft(), &node, &t1, Message::now(Role::User, "one")).unwrap();
        repo.append_message(&draft(), &node, &t2, Message::now(Role::User, "two")).unwrap();
        assert_eq!(blobs.len(), 1);

        let threads = repo.list(&draft(), &node).unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].messages[0].content, "one");
        assert_eq!(threads[1].messages[0].content, "two");

        repo.delete(&draft(), &node, &t1).unwrap();
        assert_eq!(repo.list(&draft(), &node).unwrap().len(), 1);
        assert_eq!(blobs.len(), 1);

        repo.delete(&draft(), &node, &t2).unwrap();
        assert!(blobs.is_empty());
    }

    #[test]
    fn test_summaries_skip_blobs() {
        let (repo, blobs) = setup();
        let (node, t1, _) = ids();
        repo.append_message(&draft(), &node, &t1, Message::now(Role::User, "hi")).unwrap();
        blobs.delete("cust-1/c1/draft/svc-1/message_history.json").unwrap();

        let summaries = repo.list_summaries(&draft(), &node).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 1);
        assert!(summaries[0].last_activity.is_some());

        // The full read degrades to no messages.
        assert!(repo.get(&draft(), &node, &t1).unwrap().unwrap().messages.is_empty());
    }

    #[test]
    fn test_failed_transcript_write_leaves_no_row() {
        let (repo, blobs) = setup();
        let (node, t1, _) = ids();
        // A corrupted transcript blocks the read-modify-write.
        blobs
            .put("cust-1/c1/draft/svc-1/message_history.json", b"not json")
            .unwrap();
        let result = repo.append_message(&draft(), &node, &t1, Message::now(Role::User, "hi"));
        assert!(matches!(result, Err(StorageError::Corrupted { .. })));
        assert!(repo.list_summaries(&draft(), &node).unwrap().is_empty());
    }

    #[test]
    fn test_writes_on_version_are_immutable() {
        let (repo, _) = setup();
        let (node, t1, _) = ids();
        let scope = draft().at_version(VersionId::new("v-1").unwrap());
        assert!(matches!(
            repo.append_message(&scope, &node, &t1, Message::now(Role::User, "x")),
            Err(StorageError::ImmutableVersion(_))
        ));
        assert!(matches!(
            repo.save(&scope, &ChatThread::new(node.clone(), t1.clone())),
            Err(StorageError::ImmutableVersion(_))
        ));
        assert!(matches!(
            repo.delete(&scope, &node, &t1),
            Err(StorageError::ImmutableVersion(_))
        ));
    }

    #[test]
    fn test_concurrent_appends_keep_every_thread() {
        let (repo, _) = setup();
        let node = NodeId::new("svc-1").unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let repo = repo.clone();
                let node = node.clone();
                s.spawn(move || {
                    let thread = ThreadId::new(format!("t{}", t)).unwrap();
                    for i in 0..10 {
                        repo.append_message(
                            &draft(),
                            &node,
                            &thread,
                            Message::now(Role::User, format!("m{}", i)),
                        )
                        .unwrap();
                    }
                });
            }
        });

        let threads = repo.list(&draft(), &node).unwrap();
        assert_eq!(threads.len(), 4);
        for thread in &threads {
            assert_eq!(thread.messages.len(), 10, "thread {}", thread.thread_id);
        }
        for summary in repo.list_summaries(&draft(), &node).unwrap() {
            assert_eq!(summary.message_count, 10);
        }
    }
}
