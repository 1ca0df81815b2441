//! The canvas document: one snapshot of nodes and edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::id::{EdgeId, NodeId};
use crate::node::Node;
use crate::scope::CanvasScope;

/// A canvas snapshot with its node and edge sets.
///
/// `created_at` and `updated_at` are assigned by the store on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub scope: CanvasScope,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Canvas {
    /// Creates an empty canvas stamped with the current time.
    pub fn new(scope: CanvasScope, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Canvas {
            scope,
            name: name.into(),
            created_at: now,
            updated_at: now,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| &e.id == id)
    }

    /// Inserts or replaces a node by id.
    pub fn upsert_node(&mut self, node: Node) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    /// Inserts or replaces an edge by id.
    pub fn upsert_edge(&mut self, edge: Edge) {
        match self.edges.iter_mut().find(|e| e.id == edge.id) {
            Some(existing) => *existing = edge,
            None => self.edges.push(edge),
        }
    }

    /// Sorts nodes and edges by id. Stores do not guarantee listing order.
    pub fn sort_entities(&mut self) {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        self.edges.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CanvasId, CustomerId};
    use crate::node::NodeType;

    fn scope() -> CanvasScope {
        CanvasScope::draft(CustomerId::new("cust-1").unwrap(), CanvasId::new("c1").unwrap())
    }

    #[test]
    fn upsert_replaces_by_id() {
        let mut canvas = Canvas::new(scope(), "shop");
        let id = NodeId::new("dao-1").unwrap();
        canvas.upsert_node(Node::new(id.clone(), NodeType::DataModel));
        canvas.upsert_node(Node::new(id.clone(), NodeType::StorageTable));

        assert_eq!(canvas.nodes.len(), 1);
        assert_eq!(canvas.node(&id).unwrap().node_type, NodeType::StorageTable);
    }

    #[test]
    fn sort_entities_orders_by_id() {
        let mut canvas = Canvas::new(scope(), "shop");
        canvas.upsert_node(Node::new(NodeId::new("svc-1").unwrap(), NodeType::ApplicationLogic));
        canvas.upsert_node(Node::new(NodeId::new("dao-1").unwrap(), NodeType::DataModel));
        canvas.sort_entities();
        assert_eq!(canvas.nodes[0].id.as_str(), "dao-1");
    }
}
