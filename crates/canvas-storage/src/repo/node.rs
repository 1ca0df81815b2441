//! Node persistence.
//!
//! A node is stored as a [`NodeRow`] plus one blob per generated-code
//! language. Saves upload blobs before the row that references them; reads
//! degrade an unreadable code blob to an absent language.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use canvas_core::id::NodeId;
use canvas_core::{CanvasScope, CoreError, Language, Node, NodeCodecRegistry};

use super::{entity_key, entity_id_of, scope_partition};
use crate::error::StorageError;
use crate::keys;
use crate::metadata::{ItemKey, MetadataItem, Table};
use crate::rows::{decode, encode, CodeRef, NodeRow};
use crate::stores::Stores;
use crate::version::validate_version_mutable;

#[derive(Debug, Clone)]
pub struct NodeRepository {
    stores: Stores,
    codecs: Arc<NodeCodecRegistry>,
}

impl NodeRepository {
    pub fn new(stores: Stores, codecs: Arc<NodeCodecRegistry>) -> Self {
        NodeRepository { stores, codecs }
    }

    fn key(scope: &CanvasScope, id: &NodeId) -> ItemKey {
        entity_key(Table::Nodes, scope, id.as_str())
    }

    /// Reads a node, fetching each language's code blob.
    pub fn get(&self, scope: &CanvasScope, id: &NodeId) -> Result<Option<Node>, StorageError> {
        let key = Self::key(scope, id);
        let Some(item) = self.stores.metadata.get(&key)? else {
            return Ok(None);
        };
        let row: NodeRow = decode(&key.to_string(), &item.body)?;
        self.hydrate(row).map(Some)
    }

    /// Every node of `scope`, sorted by id. Undecodable rows are logged and
    /// skipped.
    pub fn list(&self, scope: &CanvasScope) -> Result<Vec<Node>, StorageError> {
        let items = self.stores.metadata.query_prefix(
            Table::Nodes,
            &scope_partition(scope),
            &keys::version_prefix(&scope.version),
        )?;

        let mut nodes = Vec::with_capacity(items.len());
        for item in items {
            let hydrated = decode::<NodeRow>(&item.key.to_string(), &item.body)
                .and_then(|row| self.hydrate(row));
            match hydrated {
                Ok(node) => nodes.push(node),
                Err(err) => warn!(key = %item.key, error = %err, "skipping unreadable node row"),
            }
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    /// Ids of every node row in `scope`, read from the sort keys alone.
    pub fn list_ids(&self, scope: &CanvasScope) -> Result<Vec<NodeId>, StorageError> {
        let items = self.stores.metadata.query_prefix(
            Table::Nodes,
            &scope_partition(scope),
            &keys::version_prefix(&scope.version),
        )?;
        let mut ids: Vec<NodeId> = items
            .iter()
            .filter_map(|item| entity_id_of(&item.key))
            .filter_map(|id| NodeId::new(id).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Persists a node into the draft.
    ///
    /// Code blobs are written first; if any upload fails the row is left
    /// untouched. A language whose stored blob already holds the same bytes
    /// is not uploaded again. Blobs of languages the node no longer carries
    /// are removed after the row is written.
    pub fn save(&self, scope: &CanvasScope, node: &Node) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        node.validate()?;

        let codec = self.codecs.codec(node.node_type)?;
        codec.validate(&node.config)?;
        let config = codec.serialize(&node.config)?;

        let key = Self::key(scope, &node.id);
        let previous = self.read_row_lenient(&key)?;

        let mut blob_owners: HashMap<String, &Language> = HashMap::new();
        for language in node.code.keys() {
            let blob_key = keys::code_blob_key(scope, &node.id, language);
            if let Some(first) = blob_owners.insert(blob_key, language) {
                return Err(CoreError::LanguageCollision {
                    first: first.to_string(),
                    second: language.to_string(),
                    extension: language.extension(),
                }
                .into());
            }
        }

        let mut code = BTreeMap::new();
        for (language, source) in &node.code {
            let blob_key = keys::code_blob_key(scope, &node.id, language);
            let bytes = source.as_bytes();
            let code_ref = CodeRef::for_bytes(blob_key, bytes);
            if self.blob_is_current(previous.as_ref(), language, &code_ref)? {
                debug!(key = %code_ref.key, "code blob unchanged, skipping upload");
            } else {
                self.stores.blobs.put(&code_ref.key, bytes)?;
            }
            code.insert(language.clone(), code_ref);
        }

        let row = NodeRow {
            id: node.id.clone(),
            node_type: node.node_type,
            position: node.position,
            config,
            code,
            metadata: node.metadata.clone(),
            depends_on: node.depends_on.clone(),
        };
        self.stores
            .metadata
            .put(&MetadataItem::new(key, encode(&row)?))?;

        if let Some(previous) = previous {
            for old in previous.code.values() {
                if !row.code.values().any(|r| r.key == old.key) {
                    self.delete_blob(&old.key);
                }
            }
        }
        Ok(())
    }

    /// Deletes a node's code blobs and row from the draft.
    pub fn delete(&self, scope: &CanvasScope, id: &NodeId) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.purge(scope, id)
    }

    /// Deletion without the mutability guard, for version teardown.
    pub(crate) fn purge(&self, scope: &CanvasScope, id: &NodeId) -> Result<(), StorageError> {
        let key = Self::key(scope, id);
        if let Some(row) = self.read_row_lenient(&key)? {
            for code_ref in row.code.values() {
                self.delete_blob(&code_ref.key);
            }
        }
        self.stores.metadata.delete(&key)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn hydrate(&self, row: NodeRow) -> Result<Node, StorageError> {
        let config = self.codecs.codec(row.node_type)?.deserialize(row.config)?;

        let mut code = BTreeMap::new();
        for (language, code_ref) in row.code {
            if let Some(source) = self.fetch_code(&row.id, &language, &code_ref) {
                code.insert(language, source);
            }
        }

        Ok(Node {
            id: row.id,
            node_type: row.node_type,
            position: row.position,
            config,
            code,
            metadata: row.metadata,
            depends_on: row.depends_on,
        })
    }

    /// Fetches one code blob. Any failure omits the language.
    fn fetch_code(&self, node: &NodeId, language: &Language, code_ref: &CodeRef) -> Option<String> {
        let bytes = match self.stores.blobs.get(&code_ref.key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(node = %node, language = %language, key = %code_ref.key, "code blob missing, omitting language");
                return None;
            }
            Err(err) => {
                warn!(node = %node, language = %language, key = %code_ref.key, error = %err, "code blob fetch failed, omitting language");
                return None;
            }
        };
        if !code_ref.matches(&bytes) {
            warn!(node = %node, language = %language, key = %code_ref.key, "code blob digest mismatch, omitting language");
            return None;
        }
        match String::from_utf8(bytes) {
            Ok(source) => Some(source),
            Err(err) => {
                warn!(node = %node, language = %language, key = %code_ref.key, error = %err, "code blob is not UTF-8, omitting language");
                None
            }
        }
    }

    /// Whether the blob behind `code_ref` already holds its bytes. Only
    /// checked when the previous row points at the same content.
    fn blob_is_current(
        &self,
        previous: Option<&NodeRow>,
        language: &Language,
        code_ref: &CodeRef,
    ) -> Result<bool, StorageError> {
        let same_ref = previous
            .and_then(|row| row.code.get(language))
            .is_some_and(|old| old == code_ref);
        if !same_ref {
            return Ok(false);
        }
        Ok(self
            .stores
            .blobs
            .get(&code_ref.key)?
            .is_some_and(|bytes| code_ref.matches(&bytes)))
    }

    /// Reads the stored row, treating an undecodable row as absent.
    fn read_row_lenient(&self, key: &ItemKey) -> Result<Option<NodeRow>, StorageError> {
        let Some(item) = self.stores.metadata.get(key)? else {
            return Ok(None);
        };
        match decode::<NodeRow>(&key.to_string(), &item.body) {
            Ok(row) => Ok(Some(row)),
            Err(err) => {
                warn!(key = %key, error = %err, "ignoring unreadable node row");
                Ok(None)
            }
        }
    }

    fn delete_blob(&self, key: &str) {
        if let Err(err) = self.stores.blobs.delete(key) {
            warn!(key = %key, error = %err, "best-effort blob delete failed");
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
    use canvas_core::NodeType;
    use serde_json::json;

    struct Fixture {
        repo: NodeRepository,
        blobs: Arc<InMemoryBlobStore>,
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let stores = Stores::new(Arc::new(InMemoryMetadataStore::new()), blobs.clone());
        Fixture {
            repo: NodeRepository::new(stores, Arc::new(NodeCodecRegistry::standard())),
            blobs,
        }
    }

    fn draft() -> CanvasScope {
        CanvasScope::draft(CustomerId::new("cust-1").unwrap(), CanvasId::new("c1").unwrap())
    }

    fn python() -> Language {
        Language::new("python").unwrap()
    }

    fn service() -> Node {
        Node::new(NodeId::new("svc-1").unwrap(), NodeType::ApplicationLogic)
            .with_position(10.0, 20.0)
            .with_config(json!({"runtime": "python3.12"}))
            .with_code(python(), "def handler(): pass\n")
            .with_dependency(NodeId::new("dao-1").unwrap())
            .with_metadata("owner", json!("payments"))
    }

    #[test]
    fn test_save_and_get_round_trip() {
        let f = fixture();
        let node = service();
        f.repo.save(&draft(), &node).unwrap();

        assert!(f.blobs.contains("cust-1/c1/draft/svc-1/code.py"));
        let loaded = f.repo.get(&draft(), &node.id).unwrap().unwrap();
        assert_eq!(loaded, node);
    }

    #[test]
    fn test_get_missing_is_none() {
        let f = fixture();
        assert!(f.repo.get(&draft(), &NodeId::new("nope").unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_missing_blob_omits_language_only() {
        let f = fixture();
        let node = service().with_code(Language::new("sql").unwrap(), "select 1;");
        f.repo.save(&draft(), &node).unwrap();
        f.blobs.delete("cust-1/c1/draft/svc-1/code.py").unwrap();

        let loaded = f.repo.get(&draft(), &node.id).unwrap().unwrap();
        assert_eq!(loaded.code.len(), 1);
        assert!(loaded.code.contains_key(&Language::new("sql").unwrap()));
    }

    #[test]
    fn test_tampered_blob_fails_digest_check() {
        let f = fixture();
        let node = service();
        f.repo.save(&draft(), &node).unwrap();
        f.blobs.put("cust-1/c1/draft/svc-1/code.py", b"rm -rf /").unwrap();

        let loaded = f.repo.get(&draft(), &node.id).unwrap().unwrap();
        assert!(loaded.code.is_empty());
    }

    #[test]
    fn test_dropped_language_blob_is_removed() {
        let f = fixture();
        let mut node = service();
        f.repo.save(&draft(), &node).unwrap();

        node.code.clear();
        f.repo.save(&draft(), &node).unwrap();
        assert!(f.blobs.is_empty());
    }

    #[test]
    fn test_language_collision_rejected_before_writes() {
        let f = fixture();
        let node = Node::new(NodeId::new("n1").unwrap(), NodeType::ApplicationLogic)
            .with_code(Language::new("c++").unwrap(), "int main() {}")
            .with_code(Language::new("c").unwrap(), "int main() {}");
        match f.repo.save(&draft(), &node) {
            Err(StorageError::Core(CoreError::LanguageCollision { extension, .. })) => {
                assert_eq!(extension, "c")
            }
            other => panic!("expected LanguageCollision, got: {:?}", other),
        }
        assert!(f.blobs.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let f = fixture();
        let node = service().with_config(json!("not an object"));
        assert!(matches!(
            f.repo.save(&draft(), &node),
            Err(StorageError::Core(CoreError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn test_non_finite_position_rejected_before_writes() {
        let f = fixture();
        let node = service().with_position(f64::NAN, 0.0);
        match f.repo.save(&draft(), &node) {
            Err(StorageError::Core(CoreError::InvalidPosition { node: id, .. })) => {
                assert_eq!(id.as_str(), "svc-1")
            }
            other => panic!("expected InvalidPosition, got: {:?}", other),
        }
        assert!(f.blobs.is_empty());
        assert!(f.repo.get(&draft(), &node.id).unwrap().is_none());
    }

    #[test]
    fn test_save_on_version_is_immutable() {
        let f = fixture();
        let scope = draft().at_version(VersionId::new("v-1").unwrap());
        match f.repo.save(&scope, &service()) {
            Err(StorageError::ImmutableVersion(v)) => assert_eq!(v.as_str(), "v-1"),
            other => panic!("expected ImmutableVersion, got: {:?}", other),
        }
        assert!(matches!(
            f.repo.delete(&scope, &service().id),
            Err(StorageError::ImmutableVersion(_))
        ));
    }

    #[test]
    fn test_delete_removes_blobs_and_row() {
        let f = fixture();
        let node = service();
        f.repo.save(&draft(), &node).unwrap();
        f.repo.delete(&draft(), &node.id).unwrap();

        assert!(f.repo.get(&draft(), &node.id).unwrap().is_none());
        assert!(f.blobs.is_empty());
    }

    #[test]
    fn test_list_is_sorted_and_scoped() {
        let f = fixture();
        for id in ["svc-2", "dao-1", "svc-1"] {
            let node = Node::new(NodeId::new(id).unwrap(), NodeType::DataModel);
            f.repo.save(&draft(), &node).unwrap();
        }
        let other = CanvasScope::draft(CustomerId::new("cust-2").unwrap(), CanvasId::new("c1").unwrap());
        f.repo
            .save(&other, &Node::new(NodeId::new("x").unwrap(), NodeType::DataModel))
            .unwrap();

        let ids: Vec<String> = f
            .repo
            .list(&draft())
            .unwrap()
            .into_iter()
            .map(|n| n.id.to_string())
            .collect();
        assert_eq!(ids, vec!["dao-1", "svc-1", "svc-2"]);
        assert_eq!(f.repo.list_ids(&draft()).unwrap().len(), 3);
    }
}
