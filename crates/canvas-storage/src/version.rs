//! Version Manager.
//!
//! Owns the draft/immutable lifecycle: the mutability guard every write path
//! calls first, promotion of the draft to a new immutable version, version
//! listing, and version teardown.
//!
//! # Promotion
//!
//! [`VersionManager::create_version`] copies every node, edge and (when
//! configured) chat thread of the draft into a fresh version id on a bounded
//! rayon pool. Code and transcript blobs are re-uploaded under the new
//! version's keys, never shared with the draft. The version's canvas row is
//! written only after every copy has joined, so a version that appears in
//! [`VersionManager::list_versions`] is always complete. Copies left behind by
//! a failed or cancelled promotion stay invisible until
//! [`VersionManager::collect_garbage`] removes them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use canvas_core::id::{CanvasId, CustomerId, NodeId, VersionId};
use canvas_core::CanvasScope;

use crate::cancel::CancelToken;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::keys;
use crate::metadata::{ItemKey, MetadataItem, Table};
use crate::repo::CanvasRepository;
use crate::rows::{decode, encode, CanvasRow, CodeRef, NodeRow, ThreadRow};
use crate::stores::Stores;

/// Fails with [`StorageError::ImmutableVersion`] unless `version` is the draft.
pub fn validate_version_mutable(version: &VersionId) -> Result<(), StorageError> {
    if version.is_draft() {
        Ok(())
    } else {
        Err(StorageError::ImmutableVersion(version.clone()))
    }
}

/// A listed version with its canvas row timestamps. The draft carries no
/// timestamps until it has been materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: VersionId,
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// What [`VersionManager::collect_garbage`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    pub versions: Vec<VersionId>,
    pub rows_deleted: usize,
    pub blobs_deleted: usize,
}

/// Row and blob counts of one teardown.
#[derive(Debug, Default, Clone, Copy)]
struct Removed {
    rows: usize,
    blobs: usize,
}

/// One independent unit of promotion work.
enum CopyTask {
    Node(MetadataItem),
    Edge(MetadataItem),
    /// Every thread row of one node plus the node's transcript blob.
    Threads(NodeId, Vec<MetadataItem>),
}

pub struct VersionManager {
    stores: Stores,
    config: StorageConfig,
    pool: ThreadPool,
}

impl VersionManager {
    pub fn new(stores: Stores, config: StorageConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.copy_workers)
            .thread_name(|i| format!("canvas-copy-{}", i))
            .build()
            .map_err(|e| StorageError::Store(format!("failed to start copy workers: {}", e)))?;
        Ok(VersionManager {
            stores,
            config,
            pool,
        })
    }

    // -----------------------------------------------------------------------
    // Promotion
    // -----------------------------------------------------------------------

    /// Promotes the current draft to a new immutable version.
    pub fn create_version(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
        cancel: &CancelToken,
    ) -> Result<VersionId, StorageError> {
        let draft = CanvasScope::draft(customer.clone(), canvas.clone());
        let draft_key = CanvasRepository::row_key(&draft);
        let Some(draft_item) = self.stores.metadata.get(&draft_key)? else {
            return Err(StorageError::CanvasNotFound {
                customer: customer.clone(),
                canvas: canvas.clone(),
            });
        };
        let draft_row: CanvasRow = decode(&draft_key.to_string(), &draft_item.body)?;

        let version = VersionId::new(format!("v-{}", Uuid::new_v4().simple()))?;
        let target = draft.at_version(version.clone());
        let tasks = self.plan_copy(&draft)?;
        info!(scope = %draft, version = %version, tasks = tasks.len(), "promoting draft");

        self.pool.install(|| {
            tasks.par_iter().try_for_each(|task| {
                cancel.check()?;
                self.copy(task, &target)
            })
        })?;
        cancel.check()?;

        let now = Utc::now();
        let row = CanvasRow {
            name: draft_row.name,
            created_at: now,
            updated_at: now,
        };
        self.stores.metadata.put(&MetadataItem::new(
            CanvasRepository::row_key(&target),
            encode(&row)?,
        ))?;
        info!(scope = %target, "version finalized");
        Ok(version)
    }

    fn plan_copy(&self, draft: &CanvasScope) -> Result<Vec<CopyTask>, StorageError> {
        let partition = keys::partition_key(&draft.customer, &draft.canvas);
        let prefix = keys::version_prefix(&draft.version);

        let mut tasks: Vec<CopyTask> = self
            .stores
            .metadata
            .query_prefix(Table::Nodes, &partition, &prefix)?
            .into_iter()
            .map(CopyTask::Node)
            .collect();
        tasks.extend(
            self.stores
                .metadata
                .query_prefix(Table::Edges, &partition, &prefix)?
                .into_iter()
                .map(CopyTask::Edge),
        );

        if self.config.copy_chat_threads {
            let mut by_node: BTreeMap<NodeId, Vec<MetadataItem>> = BTreeMap::new();
            for item in self
                .stores
                .metadata
                .query_prefix(Table::ChatThreads, &partition, &prefix)?
            {
                let row: ThreadRow = decode(&item.key.to_string(), &item.body)?;
                by_node.entry(row.node_id).or_default().push(item);
            }
            tasks.extend(
                by_node
                    .into_iter()
                    .map(|(node, items)| CopyTask::Threads(node, items)),
            );
        }
        Ok(tasks)
    }

    fn copy(&self, task: &CopyTask, target: &CanvasScope) -> Result<(), StorageError> {
        match task {
            CopyTask::Node(item) => self.copy_node(item, target),
            CopyTask::Edge(item) => self
                .stores
                .metadata
                .put(&MetadataItem::new(retarget(&item.key, target)?, item.body.clone())),
            CopyTask::Threads(node, items) => self.copy_threads(node, items, target),
        }
    }

    fn copy_node(&self, item: &MetadataItem, target: &CanvasScope) -> Result<(), StorageError> {
        let mut row: NodeRow = decode(&item.key.to_string(), &item.body)?;

        let mut code = BTreeMap::new();
        for (language, code_ref) in &row.code {
            let bytes = match self.stores.blobs.get(&code_ref.key)? {
                Some(bytes) if code_ref.matches(&bytes) => bytes,
                Some(_) => {
                    warn!(key = %code_ref.key, "code blob digest mismatch, not copied");
                    continue;
                }
                None => {
                    warn!(key = %code_ref.key, "code blob missing, not copied");
                    continue;
                }
            };
            let new_key = keys::code_blob_key(target, &row.id, language);
            self.stores.blobs.put(&new_key, &bytes)?;
            code.insert(
                language.clone(),
                CodeRef {
                    key: new_key,
                    digest: code_ref.digest.clone(),
                    len: code_ref.len,
                },
            );
        }
        row.code = code;

        self.stores
            .metadata
            .put(&MetadataItem::new(retarget(&item.key, target)?, encode(&row)?))
    }

    fn copy_threads(
        &self,
        node: &NodeId,
        items: &[MetadataItem],
        target: &CanvasScope,
    ) -> Result<(), StorageError> {
        let new_history = keys::history_blob_key(target, node);
        let mut sources: BTreeSet<String> = BTreeSet::new();
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let row: ThreadRow = decode(&item.key.to_string(), &item.body)?;
            sources.insert(row.history_key.clone());
            rows.push((item, row));
        }

        // Rows of one node all point at the node's transcript.
        for source in &sources {
            match self.stores.blobs.get(source)? {
                Some(bytes) => self.stores.blobs.put(&new_history, &bytes)?,
                None => warn!(key = %source, "transcript blob missing, not copied"),
            }
        }

        for (item, mut row) in rows {
            row.history_key = new_history.clone();
            self.stores
                .metadata
                .put(&MetadataItem::new(retarget(&item.key, target)?, encode(&row)?))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// Finalized versions: the draft first, then versions by creation time.
    pub fn list_version_info(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<Vec<VersionInfo>, StorageError> {
        let partition = keys::partition_key(customer, canvas);
        let items = self
            .stores
            .metadata
            .query_prefix(Table::Canvases, &partition, "")?;

        let mut draft = VersionInfo {
            version: VersionId::draft(),
            name: None,
            created_at: None,
            updated_at: None,
        };
        let mut versions = Vec::new();
        for item in items {
            let version = match VersionId::new(item.key.sort_key.as_str()) {
                Ok(version) => version,
                Err(err) => {
                    warn!(key = %item.key, error = %err, "skipping canvas row with invalid version");
                    continue;
                }
            };
            let row: CanvasRow = match decode(&item.key.to_string(), &item.body) {
                Ok(row) => row,
                Err(err) => {
                    warn!(key = %item.key, error = %err, "skipping unreadable canvas row");
                    continue;
                }
            };
            let info = VersionInfo {
                version,
                name: Some(row.name),
                created_at: Some(row.created_at),
                updated_at: Some(row.updated_at),
            };
            if info.version.is_draft() {
                draft = info;
            } else {
                versions.push(info);
            }
        }
        versions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version.cmp(&b.version))
        });

        let mut all = Vec::with_capacity(versions.len() + 1);
        all.push(draft);
        all.extend(versions);
        Ok(all)
    }

    /// Finalized version ids, `draft` always first.
    pub fn list_versions(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<Vec<VersionId>, StorageError> {
        Ok(self
            .list_version_info(customer, canvas)?
            .into_iter()
            .map(|info| info.version)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Deletes one version. The canvas row goes first so the version stops
    /// being listed before its entities disappear.
    pub fn delete_version(&self, scope: &CanvasScope) -> Result<(), StorageError> {
        self.stores
            .metadata
            .delete(&CanvasRepository::row_key(scope))?;
        let removed = self.purge_entities(scope)?;
        info!(scope = %scope, rows = removed.rows, blobs = removed.blobs, "deleted version");
        Ok(())
    }

    /// Deletes every version of a canvas, then sweeps rows of versions that
    /// were never finalized.
    pub fn delete_canvas_all_versions(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<(), StorageError> {
        let draft = CanvasScope::draft(customer.clone(), canvas.clone());
        for version in self.list_versions(customer, canvas)? {
            self.delete_version(&draft.at_version(version))?;
        }
        let report = self.sweep(customer, canvas, true)?;
        info!(
            customer = %customer,
            canvas = %canvas,
            orphan_versions = report.versions.len(),
            "deleted all versions"
        );
        Ok(())
    }

    /// Removes entities of versions that have no canvas row, left behind by
    /// failed or cancelled promotions. The draft is never collected.
    ///
    /// Must not run while a promotion of the same canvas is in flight: its
    /// copies are indistinguishable from abandoned ones.
    pub fn collect_garbage(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<GcReport, StorageError> {
        let report = self.sweep(customer, canvas, false)?;
        info!(
            customer = %customer,
            canvas = %canvas,
            versions = report.versions.len(),
            rows = report.rows_deleted,
            blobs = report.blobs_deleted,
            "garbage collected"
        );
        Ok(report)
    }

    fn sweep(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
        include_draft: bool,
    ) -> Result<GcReport, StorageError> {
        let partition = keys::partition_key(customer, canvas);
        let finalized: BTreeSet<String> = self
            .stores
            .metadata
            .query_prefix(Table::Canvases, &partition, "")?
            .into_iter()
            .map(|item| item.key.sort_key)
            .collect();

        let mut orphaned: BTreeSet<String> = BTreeSet::new();
        for table in [Table::Nodes, Table::Edges, Table::ChatThreads] {
            for item in self.stores.metadata.query_prefix(table, &partition, "")? {
                if let Some((version, _)) = keys::split_sort_key(&item.key.sort_key) {
                    let is_draft = version == canvas_core::DRAFT;
                    if !finalized.contains(version) && (include_draft || !is_draft) {
                        orphaned.insert(version.to_string());
                    }
                }
            }
        }

        let draft = CanvasScope::draft(customer.clone(), canvas.clone());
        let mut report = GcReport::default();
        for raw in orphaned {
            let version = match VersionId::new(raw.as_str()) {
                Ok(version) => version,
                Err(err) => {
                    warn!(version = %raw, error = %err, "skipping rows with invalid version");
                    continue;
                }
            };
            debug!(scope = %draft, version = %version, "collecting orphaned version");
            let removed = self.purge_entities(&draft.at_version(version.clone()))?;
            report.rows_deleted += removed.rows;
            report.blobs_deleted += removed.blobs;
            report.versions.push(version);
        }
        Ok(report)
    }

    /// Deletes every entity row of `scope` and the blobs they reference.
    /// Blobs go before the rows that reference them; blob deletion is best
    /// effort.
    fn purge_entities(&self, scope: &CanvasScope) -> Result<Removed, StorageError> {
        let partition = keys::partition_key(&scope.customer, &scope.canvas);
        let prefix = keys::version_prefix(&scope.version);
        let mut removed = Removed::default();

        for item in self
            .stores
            .metadata
            .query_prefix(Table::Nodes, &partition, &prefix)?
        {
            match decode::<NodeRow>(&item.key.to_string(), &item.body) {
                Ok(row) => {
                    for code_ref in row.code.values() {
                        removed.blobs += self.delete_blob(&code_ref.key);
                    }
                }
                Err(err) => warn!(key = %item.key, error = %err, "node row unreadable, its blobs may remain"),
            }
            self.stores.metadata.delete(&item.key)?;
            removed.rows += 1;
        }

        for item in self
            .stores
            .metadata
            .query_prefix(Table::Edges, &partition, &prefix)?
        {
            self.stores.metadata.delete(&item.key)?;
            removed.rows += 1;
        }

        let threads = self
            .stores
            .metadata
            .query_prefix(Table::ChatThreads, &partition, &prefix)?;
        let mut history_keys = BTreeSet::new();
        for item in &threads {
            match decode::<ThreadRow>(&item.key.to_string(), &item.body) {
                Ok(row) => {
                    history_keys.insert(row.history_key);
                }
                Err(err) => warn!(key = %item.key, error = %err, "thread row unreadable, its transcript may remain"),
            }
        }
        for key in &history_keys {
            removed.blobs += self.delete_blob(key);
        }
        for item in threads {
            self.stores.metadata.delete(&item.key)?;
            removed.rows += 1;
        }

        Ok(removed)
    }

    fn delete_blob(&self, key: &str) -> usize {
        match self.stores.blobs.delete(key) {
            Ok(()) => 1,
            Err(err) => {
                warn!(key = %key, error = %err, "best-effort blob delete failed");
                0
            }
        }
    }
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Moves an entity row key into `target`'s version.
fn retarget(key: &ItemKey, target: &CanvasScope) -> Result<ItemKey, StorageError> {
    let (_, entity_id) = keys::split_sort_key(&key.sort_key)
        .ok_or_else(|| StorageError::corrupted(key.to_string(), "sort key has no version"))?;
    Ok(ItemKey::new(
        key.table,
        key.partition_key.clone(),
        keys::sort_key(&target.version, entity_id),
    ))
}
