//! CanvasCoordinator: the single entry point for callers of the storage
//! layer.
//!
//! The coordinator is built from explicit adapter instances and a codec
//! registry; it holds no state beyond the repositories, the version manager
//! and the handles they share. Every write re-runs the mutability guard
//! before delegating, and the repositories run it again.

use std::sync::Arc;

use tracing::debug;

use canvas_core::id::{CanvasId, CustomerId, EdgeId, NodeId, ThreadId, VersionId};
use canvas_core::{
    Canvas, CanvasScope, ChatThread, DependencyResolver, Edge, Message, Node, NodeCodecRegistry,
    ThreadSummary,
};

use crate::blob::BlobStore;
use crate::cancel::CancelToken;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::metadata::MetadataStore;
use crate::repo::{CanvasRepository, EdgeRepository, NodeRepository, ThreadRepository};
use crate::stores::Stores;
use crate::version::{validate_version_mutable, GcReport, VersionInfo, VersionManager};

pub struct CanvasCoordinator {
    canvases: CanvasRepository,
    nodes: NodeRepository,
    edges: EdgeRepository,
    threads: ThreadRepository,
    versions: VersionManager,
}

impl CanvasCoordinator {
    /// Wires the repositories over `metadata` and `blobs`, wrapping both
    /// adapters in the configured retry policy.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        config: StorageConfig,
        codecs: NodeCodecRegistry,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        let stores = Stores::with_retry(metadata, blobs, &config.retry);
        let nodes = NodeRepository::new(stores.clone(), Arc::new(codecs));
        let edges = EdgeRepository::new(stores.clone());
        let threads = ThreadRepository::new(stores.clone());
        let canvases = CanvasRepository::new(
            stores.clone(),
            nodes.clone(),
            edges.clone(),
            threads.clone(),
        );
        let versions = VersionManager::new(stores, config)?;
        Ok(CanvasCoordinator {
            canvases,
            nodes,
            edges,
            threads,
            versions,
        })
    }

    /// A coordinator with the default configuration and standard codecs.
    pub fn with_defaults(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, StorageError> {
        Self::new(
            metadata,
            blobs,
            StorageConfig::default(),
            NodeCodecRegistry::standard(),
        )
    }

    // -----------------------------------------------------------------------
    // Canvas operations
    // -----------------------------------------------------------------------

    pub fn create_canvas(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
        name: &str,
    ) -> Result<Canvas, StorageError> {
        self.canvases.create(customer, canvas, name)
    }

    pub fn get_canvas(&self, scope: &CanvasScope) -> Result<Option<Canvas>, StorageError> {
        self.canvases.get(scope)
    }

    pub fn save_canvas(&self, canvas: &Canvas) -> Result<Canvas, StorageError> {
        self.save_canvas_with(canvas, &CancelToken::new())
    }

    pub fn save_canvas_with(
        &self,
        canvas: &Canvas,
        cancel: &CancelToken,
    ) -> Result<Canvas, StorageError> {
        validate_version_mutable(&canvas.scope.version)?;
        self.canvases.save(canvas, cancel)
    }

    /// Deletes one version of a canvas, draft included.
    pub fn delete_canvas(&self, scope: &CanvasScope) -> Result<(), StorageError> {
        self.versions.delete_version(scope)
    }

    pub fn delete_canvas_all_versions(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<(), StorageError> {
        self.versions.delete_canvas_all_versions(customer, canvas)
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    pub fn list_versions(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<Vec<VersionId>, StorageError> {
        self.versions.list_versions(customer, canvas)
    }

    pub fn list_version_info(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<Vec<VersionInfo>, StorageError> {
        self.versions.list_version_info(customer, canvas)
    }

    pub fn create_version(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<VersionId, StorageError> {
        self.create_version_with(customer, canvas, &CancelToken::new())
    }

    pub fn create_version_with(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
        cancel: &CancelToken,
    ) -> Result<VersionId, StorageError> {
        self.versions.create_version(customer, canvas, cancel)
    }

    pub fn collect_garbage(
        &self,
        customer: &CustomerId,
        canvas: &CanvasId,
    ) -> Result<GcReport, StorageError> {
        self.versions.collect_garbage(customer, canvas)
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    pub fn get_node(&self, scope: &CanvasScope, id: &NodeId) -> Result<Option<Node>, StorageError> {
        self.nodes.get(scope, id)
    }

    pub fn save_node(&self, scope: &CanvasScope, node: &Node) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.nodes.save(scope, node)
    }

    /// Deletes a node together with its chat threads and every edge that
    /// names it as source or target.
    pub fn delete_node(&self, scope: &CanvasScope, id: &NodeId) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.threads.purge_node(scope, id)?;
        self.edges.purge_attached(scope, id)?;
        self.nodes.delete(scope, id)
    }

    pub fn list_nodes(&self, scope: &CanvasScope) -> Result<Vec<Node>, StorageError> {
        self.nodes.list(scope)
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    pub fn get_edge(&self, scope: &CanvasScope, id: &EdgeId) -> Result<Option<Edge>, StorageError> {
        self.edges.get(scope, id)
    }

    pub fn save_edge(&self, scope: &CanvasScope, edge: &Edge) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.edges.save(scope, edge)
    }

    pub fn delete_edge(&self, scope: &CanvasScope, id: &EdgeId) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.edges.delete(scope, id)
    }

    pub fn list_edges(&self, scope: &CanvasScope) -> Result<Vec<Edge>, StorageError> {
        self.edges.list(scope)
    }

    // -----------------------------------------------------------------------
    // Chat threads
    // -----------------------------------------------------------------------

    pub fn get_thread(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
        thread: &ThreadId,
    ) -> Result<Option<ChatThread>, StorageError> {
        self.threads.get(scope, node, thread)
    }

    pub fn save_thread(&self, scope: &CanvasScope, thread: &ChatThread) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.threads.save(scope, thread)
    }

    pub fn append_message(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
        thread: &ThreadId,
        message: Message,
    ) -> Result<ChatThread, StorageError> {
        validate_version_mutable(&scope.version)?;
        self.threads.append_message(scope, node, thread, message)
    }

    pub fn delete_thread(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
        thread: &ThreadId,
    ) -> Result<(), StorageError> {
        validate_version_mutable(&scope.version)?;
        self.threads.delete(scope, node, thread)
    }

    pub fn list_threads(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
    ) -> Result<Vec<ChatThread>, StorageError> {
        self.threads.list(scope, node)
    }

    pub fn list_thread_summaries(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
    ) -> Result<Vec<ThreadSummary>, StorageError> {
        self.threads.list_summaries(scope, node)
    }

    // -----------------------------------------------------------------------
    // Dependency order
    // -----------------------------------------------------------------------

    /// Resolver over the stored canvas, or `None` if the canvas is absent.
    pub fn resolver(&self, scope: &CanvasScope) -> Result<Option<DependencyResolver>, StorageError> {
        let Some(canvas) = self.canvases.get(scope)? else {
            return Ok(None);
        };
        debug!(scope = %scope, nodes = canvas.nodes.len(), "building dependency resolver");
        Ok(Some(DependencyResolver::from_canvas(&canvas)?))
    }

    /// Deterministic processing order of the stored canvas.
    pub fn processing_order(&self, scope: &CanvasScope) -> Result<Option<Vec<NodeId>>, StorageError> {
        match self.resolver(scope)? {
            Some(resolver) => Ok(Some(resolver.get_processing_order()?)),
            None => Ok(None),
        }
    }

    /// Batches of mutually independent nodes, parents before dependents.
    pub fn processing_levels(
        &self,
        scope: &CanvasScope,
    ) -> Result<Option<Vec<Vec<NodeId>>>, StorageError> {
        match self.resolver(scope)? {
            Some(resolver) => Ok(Some(resolver.processing_levels()?)),
            None => Ok(None),
        }
    }

    /// Transitive dependents of `node`, in processing order.
    pub fn dependents_of(
        &self,
        scope: &CanvasScope,
        node: &NodeId,
    ) -> Result<Option<Vec<NodeId>>, StorageError> {
        match self.resolver(scope)? {
            Some(resolver) => Ok(Some(resolver.dependents_of(node)?)),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for CanvasCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasCoordinator")
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}
