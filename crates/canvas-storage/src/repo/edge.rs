//! Edge persistence. Edges carry no blob payloads.

use tracing::{debug, warn};

use canvas_core::id::{EdgeId, NodeId};
use canvas_core::{CanvasScope, Edge};

use super::{entity_id_of, entity_key, scope_partition};
use crate::error::StorageError;
use crate::keys;
use crate::metadata::{ItemKey, MetadataItem, Table};
use crate::rows::{decode, encode};
use crate::stores::Stores;
use crate::version::validate_version_mutable;

#[derive(Debug, Clone)]
pub struct EdgeRepository {
    stores: Stores,
}

impl EdgeRepository {
    pub fn new(stores: Stores) -> Self {
        EdgeRepository { stores }
    }

    fn key(scope: &CanvasScope, id: &EdgeId) -> ItemKey {
        entity_key(Table::Edges, scope, id.as_str())
    }

    pub fn get(&self, scope: &CanvasScope, id: &EdgeId) -> Result<Option<Edge>, StorageError> {
        let key = Self::key(scope, id);
        match self.stores.metadata.get(&key)? {
            Some(item) => decode(&key.to_string(), &item.body).map(Some),
            None => Ok(None),
        }
    }

    /// Every edge of `scope`, sorted by id. Undecodable rows are logged and
    /// skipped.
    pub fn list(&self, scope: &CanvasScope) -> Result<Vec<Edge>, StorageError> {
        let items = self.stores.metadata.query_prefix(
            Table::Edges,
            &scope_partition(scope),
            &keys::version_prefix(&scope.version),
        )?;

        let mut edges = Vec::with_capacity(items.len());
        for item in items {
            match decode::<Edge>(&item.key.to_string(), &item.body) {
                Ok(edge) => edges.push(edge),
                Err(err) => warn!(key = %item.key, error = %err, "skipping unreadable edge row"),
            }
        }
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(edges)
    }

    pub fn list_ids(&self, scope: &CanvasScope) -> Result<Vec<EdgeId>, StorageError> {
        let items = self.stores.metadata.query_prefix(
            Table::Edges,
            &scope_partition(scope),
            &keys::version_prefix(&scope.version),
        )?;
        let mut ids: Vec<EdgeId> = items
            .iter()
            .filter_map(|item| entity_id_of(&item.key))
            .filter_map(|id| EdgeId::new(id).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn save(&self, scope: &CanvasScope, edge: &Edge) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        let item = MetadataItem::new(Self::key(scope, &edge.id), encode(edge)?);
        self.stores.metadata.put(&item)
    }

    pub fn delete(&self, scope: &CanvasScope, id: &EdgeId) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.purge(scope, id)
    }

    pub(crate) fn purge(&self, scope: &CanvasScope, id: &EdgeId) -> Result<(), StorageError> {
        self.stores.metadata.delete(&Self::key(scope, id))
    }

    /// Removes every edge with `node` as source or target, without the
    /// mutability guard. Returns the number of edges removed.
    pub(crate) fn purge_attached(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
    ) -> Result<usize, StorageError> {
        let mut removed = 0;
        for edge in self.list(scope)? {
            if edge.source == *node || edge.target == *node {
                debug!(scope = %scope, edge = %edge.id, node = %node, "removing edge of deleted node");
                self.purge(scope, &edge.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::InMemoryBlobStore;
    use crate::metadata::memory::InMemoryMetadataStore;
    use crate::metadata::MetadataStore;
    use canvas_core::id::{CanvasId, CustomerId, NodeId, VersionId};
    use canvas_core::EdgeKind;
    use std::sync::Arc;

    fn draft() -> CanvasScope {
        CanvasScope::draft(CustomerId::new("cust-1").unwrap(), CanvasId::new("c1").unwrap())
    }

    fn edge(id: &str) -> Edge {
        Edge::new(
            EdgeId::new(id).unwrap(),
            NodeId::new("dao-1").unwrap(),
            NodeId::new("svc-1").unwrap(),
        )
    }

    #[test]
    fn test_edge_crud() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let repo = EdgeRepository::new(Stores::new(metadata.clone(), Arc::new(InMemoryBlobStore::new())));

        let e1 = edge("e1").with_kind(EdgeKind::Composition).with_label("reads");
        repo.save(&draft(), &e1).unwrap();
        repo.save(&draft(), &edge("e0")).unwrap();
        assert_eq!(repo.get(&draft(), &e1.id).unwrap(), Some(e1.clone()));

        let listed: Vec<String> = repo.list(&draft()).unwrap().iter().map(|e| e.id.to_string()).collect();
        assert_eq!(listed, vec!["e0", "e1"]);

        repo.delete(&draft(), &e1.id).unwrap();
        assert_eq!(repo.get(&draft(), &e1.id).unwrap(), None);
        assert_eq!(repo.list_ids(&draft()).unwrap().len(), 1);
    }

    #[test]
    fn test_purge_attached_keeps_unrelated_edges() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let repo = EdgeRepository::new(Stores::new(metadata.clone(), Arc::new(InMemoryBlobStore::new())));
        repo.save(&draft(), &edge("e1")).unwrap();
        repo.save(
            &draft(),
            &Edge::new(
                EdgeId::new("e2").unwrap(),
                NodeId::new("api-1").unwrap(),
                NodeId::new("dao-1").unwrap(),
            ),
        )
        .unwrap();
        repo.save(
            &draft(),
            &Edge::new(
                EdgeId::new("e3").unwrap(),
                NodeId::new("api-1").unwrap(),
                NodeId::new("bucket-1").unwrap(),
            ),
        )
        .unwrap();

        let removed = repo.purge_attached(&draft(), &NodeId::new("dao-1").unwrap()).unwrap();
        assert_eq!(removed, 2);
        let left: Vec<String> = repo.list_ids(&draft()).unwrap().iter().map(|e| e.to_string()).collect();
        assert_eq!(left, vec!["e3"]);
    }

    #[test]
    fn test_corrupted_row_skipped_in_list() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let repo = EdgeRepository::new(Stores::new(metadata.clone(), Arc::new(InMemoryBlobStore::new())));
        repo.save(&draft(), &edge("e1")).unwrap();
        metadata
            .put(&MetadataItem::new(
                entity_key(Table::Edges, &draft(), "e2"),
                b"garbage".to_vec(),
            ))
            .unwrap();

        assert_eq!(repo.list(&draft()).unwrap().len(), 1);
        assert!(matches!(
            repo.get(&draft(), &EdgeId::new("e2").unwrap()),
            Err(StorageError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_save_on_version_is_immutable() {
        let repo = EdgeRepository::new(Stores::new(
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        ));
        let scope = draft().at_version(VersionId::new("v-1").unwrap());
        assert!(matches!(
            repo.save(&scope, &edge("e1")),
            Err(StorageError::ImmutableVersion(_))
        ));
    }
}
