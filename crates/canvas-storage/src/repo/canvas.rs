//! Whole-canvas reads and saves composed from the entity repositories.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info};

use canvas_core::id::{CanvasId, CustomerId};
use canvas_core::{Canvas, CanvasScope};

use super::{EdgeRepository, NodeRepository, ThreadRepository};
use crate::cancel::CancelToken;
use crate::error::StorageError;
use crate::keys;
use crate::metadata::{ItemKey, MetadataItem, Table};
use crate::rows::{decode, encode, CanvasRow};
use crate::stores::Stores;
use crate::version::validate_version_mutable;

#[derive(Debug, Clone)]
pub struct CanvasRepository {
    stores: Stores,
    nodes: NodeRepository,
    edges: EdgeRepository,
    threads: ThreadRepository,
}

impl CanvasRepository {
    pub fn new(
        stores: Stores,
        nodes: NodeRepository,
        edges: EdgeRepository,
        threads: ThreadRepository,
    ) -> Self {
        CanvasRepository {
            stores,
            nodes,
            edges,
            threads,
        }
    }

    pub(crate) fn row_key(scope: &CanvasScope) -> ItemKey {
        ItemKey::new(
            Table::Canvases,
            keys::partition_key(&scope.customer, &scope.canvas),
            keys::canvas_sort_key(&scope.version),
        )
    }

    pub(crate) fn read_row(&self, scope: &CanvasScope) -> Result<Option<CanvasRow>, StorageError> {
        let key = Self::row_key(scope);
        match self.stores.metadata.get(&key)? {
            Some(item) => decode(&key.to_string(), &item.body).map(Some),
            None => Ok(None),
        }
    }

    /// Materializes an empty draft. An existing draft is returned unchanged.
    pub fn create(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
        name: &str,
    ) -> Result<Canvas, StorageError> {
        let scope = CanvasScope::draft(customer.clone(), canvas.clone());
        if let Some(existing) = self.get(&scope)? {
            debug!(scope = %scope, "draft already exists");
            return Ok(existing);
        }

        let created = Canvas::new(scope, name);
        let row = CanvasRow {
            name: created.name.clone(),
            created_at: created.created_at,
            updated_at: created.updated_at,
        };
        self.stores.metadata.put(&MetadataItem::new(
            Self::row_key(&created.scope),
            encode(&row)?,
        ))?;
        info!(scope = %created.scope, "created canvas");
        Ok(created)
    }

    /// Reads a canvas snapshot. `None` only when the canvas row is absent;
    /// unreadable nodes and edges are skipped.
    pub fn get(&self, scope: &CanvasScope) -> Result<Option<Canvas>, StorageError> {
        let Some(row) = self.read_row(scope)? else {
            return Ok(None);
        };
        Ok(Some(Canvas {
            scope: scope.clone(),
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
            nodes: self.nodes.list(scope)?,
            edges: self.edges.list(scope)?,
        }))
    }

    /// Persists a whole draft: nodes, then edges, then removal of stored
    /// entities the canvas no longer contains, then the canvas row.
    ///
    /// Not atomic. A failed or cancelled save leaves some entities written;
    /// callers must re-read to learn the stored state. Returns the canvas
    /// with its stored timestamps.
    pub fn save(&self, canvas: &Canvas, cancel: &CancelToken) -> Result<Canvas, StorageError> {
        let scope = &canvas.scope;
        validate_version_mutable(&scope.version)?;

        for node in &canvas.nodes {
            cancel.check()?;
            self.nodes.save(scope, node)?;
        }
        for edge in &canvas.edges {
            cancel.check()?;
            self.edges.save(scope, edge)?;
        }

        let keep_nodes: BTreeSet<_> = canvas.nodes.iter().map(|n| &n.id).collect();
        for id in self.nodes.list_ids(scope)? {
            if !keep_nodes.contains(&id) {
                cancel.check()?;
                debug!(scope = %scope, node = %id, "pruning node");
                self.threads.purge_node(scope, &id)?;
                self.nodes.purge(scope, &id)?;
            }
        }
        let keep_edges: BTreeSet<_> = canvas.edges.iter().map(|e| &e.id).collect();
        for id in self.edges.list_ids(scope)? {
            if !keep_edges.contains(&id) {
                cancel.check()?;
                debug!(scope = %scope, edge = %id, "pruning edge");
                self.edges.purge(scope, &id)?;
            }
        }

        cancel.check()?;
        let now = Utc::now();
        let created_at = match self.read_row(scope)? {
            Some(existing) => existing.created_at,
            None => now,
        };
        let row = CanvasRow {
            name: canvas.name.clone(),
            created_at,
            updated_at: now,
        };
        self.stores
            .metadata
            .put(&MetadataItem::new(Self::row_key(scope), encode(&row)?))?;

        let mut saved = canvas.clone();
        saved.created_at = created_at;
        saved.updated_at = now;
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::InMemoryBlobStore;
    use crate::metadata::memory::InMemoryMetadataStore;
    use crate::metadata::MetadataStore;
    use canvas_core::id::{EdgeId, NodeId, ThreadId, VersionId};
    use canvas_core::{Edge, Language, Message, Node, NodeCodecRegistry, NodeType, Role};
    use std::sync::Arc;

    struct Fixture {
        repo: CanvasRepository,
        threads: ThreadRepository,
        metadata: Arc<InMemoryMetadataStore>,
        blobs: Arc<InMemoryBlobStore>,
    }

    fn fixture() -> Fixture {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let stores = Stores::new(metadata.clone(), blobs.clone());
        let threads = ThreadRepository::new(stores.clone());
        let repo = CanvasRepository::new(
            stores.clone(),
            NodeRepository::new(stores.clone(), Arc::new(NodeCodecRegistry::standard())),
            EdgeRepository::new(stores),
            threads.clone(),
        );
        Fixture {
            repo,
            threads,
            metadata,
            blobs,
        }
    }

    fn customer() -> CustomerId {
        CustomerId::new("cust-1").unwrap()
    }

    fn canvas_id() -> CanvasId {
        CanvasId::new("c1").unwrap()
    }

    fn sample() -> Canvas {
        let mut canvas = Canvas::new(CanvasScope::draft(customer(), canvas_id()), "shop");
        canvas.upsert_node(
            Node::new(NodeId::new("dao-1").unwrap(), NodeType::DataModel)
                .with_code(Language::new("python").unwrap(), "class Order: ..."),
        );
        canvas.upsert_node(
            Node::new(NodeId::new("svc-1").unwrap(), NodeType::ApplicationLogic)
                .with_dependency(NodeId::new("dao-1").unwrap()),
        );
        canvas.upsert_edge(Edge::new(
            EdgeId::new("e1").unwrap(),
            NodeId::new("dao-1").unwrap(),
            NodeId::new("svc-1").unwrap(),
        ));
        canvas
    }

    #[test]
    fn test_create_is_idempotent() {
        let f = fixture();
        let first = f.repo.create(&customer(), &canvas_id(), "shop").unwrap();
        let second = f.repo.create(&customer(), &canvas_id(), "renamed").unwrap();
        assert_eq!(second.name, "shop");
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn test_save_then_get_round_trip() {
        let f = fixture();
        let canvas = sample();
        let saved = f.repo.save(&canvas, &CancelToken::new()).unwrap();
        let loaded = f.repo.get(&canvas.scope).unwrap().unwrap();

        assert_eq!(loaded, saved);
        assert_eq!(loaded.nodes, canvas.nodes);
        assert_eq!(loaded.edges, canvas.edges);
    }

    #[test]
    fn test_get_missing_canvas_is_none() {
        let f = fixture();
        let scope = CanvasScope::draft(customer(), canvas_id());
        assert!(f.repo.get(&scope).unwrap().is_none());
    }

    #[test]
    fn test_save_preserves_created_at() {
        let f = fixture();
        let created = f.repo.create(&customer(), &canvas_id(), "shop").unwrap();
        let saved = f.repo.save(&sample(), &CancelToken::new()).unwrap();
        assert_eq!(saved.created_at, created.created_at);
        assert!(saved.updated_at >= created.updated_at);
    }

    #[test]
    fn test_save_prunes_removed_entities_and_threads() {
        let f = fixture();
        let mut canvas = sample();
        f.repo.save(&canvas, &CancelToken::new()).unwrap();
        let dao = NodeId::new("dao-1").unwrap();
        f.threads
            .append_message(&canvas.scope, &dao, &ThreadId::new("t1").unwrap(), Message::now(Role::User, "hi"))
            .unwrap();

        canvas.nodes.retain(|n| n.id != dao);
        canvas.edges.clear();
        f.repo.save(&canvas, &CancelToken::new()).unwrap();

        let loaded = f.repo.get(&canvas.scope).unwrap().unwrap();
        assert_eq!(loaded.nodes.len(), 1);
        assert!(loaded.edges.is_empty());
        assert!(f.threads.list_summaries(&canvas.scope, &dao).unwrap().is_empty());
        assert!(f.blobs.is_empty());
    }

    #[test]
    fn test_save_on_version_writes_nothing() {
        let f = fixture();
        let mut canvas = sample();
        canvas.scope = canvas.scope.at_version(VersionId::new("v-1").unwrap());
        assert!(matches!(
            f.repo.save(&canvas, &CancelToken::new()),
            Err(StorageError::ImmutableVersion(_))
        ));
        assert!(f.metadata.is_empty());
        assert!(f.blobs.is_empty());
    }

    #[test]
    fn test_cancelled_save_never_writes_canvas_row() {
        let f = fixture();
        let cancel = CancelToken::new();
        cancel.cancel();
        let canvas = sample();
        assert!(matches!(
            f.repo.save(&canvas, &cancel),
            Err(StorageError::Cancelled)
        ));
        assert!(f
            .metadata
            .get(&CanvasRepository::row_key(&canvas.scope))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unreadable_canvas_row_fails_save() {
        let f = fixture();
        let canvas = sample();
        let key = CanvasRepository::row_key(&canvas.scope);
        f.metadata
            .put(&MetadataItem::new(key.clone(), b"{broken".to_vec()))
            .unwrap();

        match f.repo.save(&canvas, &CancelToken::new()) {
            Err(StorageError::Corrupted { key: k, .. }) => assert_eq!(k, key.to_string()),
            other => panic!("expected Corrupted, got: {:?}", other),
        }
        // The unreadable row is left in place rather than overwritten.
        assert_eq!(f.metadata.get(&key).unwrap().unwrap().body, b"{broken".to_vec());
    }
}
