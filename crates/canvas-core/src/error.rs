//! Core error types for canvas-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! identifier validation, node configuration codecs and dependency
//! resolution.

use thiserror::Error;

use crate::id::NodeId;
use crate::node::NodeType;

/// Core errors produced by the canvas-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An identifier was empty or contained a reserved key separator.
    #[error("invalid {kind} identifier '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    /// A language tag could not be normalized.
    #[error("invalid language tag '{0}'")]
    InvalidLanguage(String),

    /// Two languages of one node resolve to the same code blob.
    #[error("languages '{first}' and '{second}' share the code extension '{extension}'")]
    LanguageCollision {
        first: String,
        second: String,
        extension: String,
    },

    /// A node type tag outside the closed set.
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    /// No configuration codec was registered for a node type.
    #[error("no configuration codec registered for node type {0}")]
    UnregisteredNodeType(NodeType),

    /// A node configuration payload was rejected by its codec.
    #[error("invalid configuration for {node_type} node: {reason}")]
    InvalidConfig { node_type: NodeType, reason: String },

    /// A node position has a NaN or infinite coordinate.
    #[error("node {node} has a non-finite position ({x}, {y})")]
    InvalidPosition { node: NodeId, x: f64, y: f64 },

    /// The dependency graph is not a DAG. `node` lies on the cycle and
    /// `path` lists the cycle in traversal order, starting at `node`.
    #[error("dependency cycle detected at node {node}")]
    CycleDetected { node: NodeId, path: Vec<NodeId> },

    /// A node declares a parent that is not part of the canvas.
    #[error("node {node} depends on unknown node {parent}")]
    UnknownDependency { node: NodeId, parent: NodeId },

    /// A node id was not found in the dependency graph.
    #[error("node not found: {0}")]
    UnknownNode(NodeId),
}
