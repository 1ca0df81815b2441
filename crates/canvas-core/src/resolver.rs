//! Deterministic processing order over node dependencies.
//!
//! [`DependencyResolver`] stores nodes in a petgraph arena with one directed
//! edge per declared dependency, pointing from a node to its parent. The
//! processing order is a post-order depth-first traversal driven by an
//! explicit work stack, so deep graphs never grow the call stack.
//!
//! Roots and parents are always visited in ascending [`NodeId`] order, which
//! makes the result independent of input iteration order.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::canvas::Canvas;
use crate::edge::EdgeKind;
use crate::error::CoreError;
use crate::id::NodeId;
use crate::node::Node;

/// Traversal state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// One entry of the explicit DFS stack.
struct Frame {
    node: NodeIndex,
    /// Parents of `node`, sorted by id.
    parents: Vec<NodeIndex>,
    next: usize,
}

/// Dependency graph of one canvas snapshot.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    /// Edge `a -> b` means `a` depends on `b`.
    graph: DiGraph<NodeId, ()>,
    index: BTreeMap<NodeId, NodeIndex>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from each node's declared parents.
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Result<Self, CoreError> {
        let nodes: Vec<&Node> = nodes.into_iter().collect();
        let mut resolver = DependencyResolver::new();
        for node in &nodes {
            resolver.add_node(node.id.clone());
        }
        for node in &nodes {
            for parent in &node.depends_on {
                resolver.add_dependency(&node.id, parent)?;
            }
        }
        Ok(resolver)
    }

    /// Builds the graph from declared parents plus dependency edges.
    ///
    /// A dependency edge `source -> target` makes `source` a parent of
    /// `target`. Composition edges do not constrain the order.
    pub fn from_canvas(canvas: &Canvas) -> Result<Self, CoreError> {
        let mut resolver = DependencyResolver::from_nodes(&canvas.nodes)?;
        for edge in &canvas.edges {
            if edge.kind == EdgeKind::Dependency {
                resolver.add_dependency(&edge.target, &edge.source)?;
            }
        }
        Ok(resolver)
    }

    /// Adds a node, returning its arena index. Adding an existing id is a no-op.
    pub fn add_node(&mut self, id: NodeId) -> NodeIndex {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id, idx);
        idx
    }

    /// Records that `node` depends on `parent`. Both must already be present.
    pub fn add_dependency(&mut self, node: &NodeId, parent: &NodeId) -> Result<(), CoreError> {
        let child = *self
            .index
            .get(node)
            .ok_or_else(|| CoreError::UnknownNode(node.clone()))?;
        let parent_idx = *self
            .index
            .get(parent)
            .ok_or_else(|| CoreError::UnknownDependency {
                node: node.clone(),
                parent: parent.clone(),
            })?;
        self.graph.update_edge(child, parent_idx, ());
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Direct parents of a node, sorted by id.
    pub fn parents_of(&self, id: &NodeId) -> Result<Vec<&NodeId>, CoreError> {
        let idx = self.lookup(id)?;
        Ok(self
            .sorted_neighbors(idx, Direction::Outgoing)
            .into_iter()
            .map(|n| &self.graph[n])
            .collect())
    }

    /// Topological order: every node appears after all of its parents.
    ///
    /// Returns [`CoreError::CycleDetected`] naming a node on the cycle when
    /// the graph is not a DAG.
    pub fn get_processing_order(&self) -> Result<Vec<NodeId>, CoreError> {
        let mut state = vec![VisitState::Unvisited; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());

        for &root in self.index.values() {
            if state[root.index()] != VisitState::Unvisited {
                continue;
            }
            state[root.index()] = VisitState::InProgress;
            let mut stack = vec![self.frame(root)];

            while let Some(frame) = stack.last_mut() {
                let next = frame.parents.get(frame.next).copied();
                frame.next += 1;
                match next {
                    Some(parent) => match state[parent.index()] {
                        VisitState::Done => {}
                        VisitState::InProgress => return Err(self.cycle_error(parent, &stack)),
                        VisitState::Unvisited => {
                            state[parent.index()] = VisitState::InProgress;
                            stack.push(self.frame(parent));
                        }
                    },
                    None => {
                        let node = frame.node;
                        stack.pop();
                        state[node.index()] = VisitState::Done;
                        order.push(self.graph[node].clone());
                    }
                }
            }
        }

        Ok(order)
    }

    /// Groups nodes into batches that can be processed concurrently.
    ///
    /// Batch `k` holds the nodes whose longest dependency chain has length
    /// `k`; each batch is sorted by id.
    pub fn processing_levels(&self) -> Result<Vec<Vec<NodeId>>, CoreError> {
        let order = self.get_processing_order()?;
        let mut level: HashMap<NodeIndex, usize> = HashMap::with_capacity(order.len());
        let mut levels: Vec<Vec<NodeId>> = Vec::new();

        for id in order {
            let idx = self.index[&id];
            let depth = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|parent| level[&parent] + 1)
                .max()
                .unwrap_or(0);
            level.insert(idx, depth);
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(id);
        }

        for batch in &mut levels {
            batch.sort();
        }
        Ok(levels)
    }

    /// Every node that transitively depends on `id`, in processing order.
    pub fn dependents_of(&self, id: &NodeId) -> Result<Vec<NodeId>, CoreError> {
        let start = self.lookup(id)?;
        let mut seen: BTreeSet<NodeIndex> = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for child in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        seen.remove(&start);

        let order = self.get_processing_order()?;
        Ok(order
            .into_iter()
            .filter(|n| seen.contains(&self.index[n]))
            .collect())
    }

    fn lookup(&self, id: &NodeId) -> Result<NodeIndex, CoreError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::UnknownNode(id.clone()))
    }

    fn sorted_neighbors(&self, idx: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, dir).collect();
        neighbors.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        neighbors
    }

    fn frame(&self, node: NodeIndex) -> Frame {
        Frame {
            node,
            parents: self.sorted_neighbors(node, Direction::Outgoing),
            next: 0,
        }
    }

    /// The in-progress frames from `reentered` to the top of the stack form
    /// the cycle.
    fn cycle_error(&self, reentered: NodeIndex, stack: &[Frame]) -> CoreError {
        let start = stack
            .iter()
            .position(|f| f.node == reentered)
            .unwrap_or(0);
        let path = stack[start..]
            .iter()
            .map(|f| self.graph[f.node].clone())
            .collect();
        CoreError::CycleDetected {
            node: self.graph[reentered].clone(),
            path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::id::{CanvasId, CustomerId, EdgeId};
    use crate::node::NodeType;
    use crate::scope::CanvasScope;
    use proptest::prelude::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn node(name: &str, parents: &[&str]) -> Node {
        parents.iter().fold(
            Node::new(id(name), NodeType::ApplicationLogic),
            |n, p| n.with_dependency(id(p)),
        )
    }

    fn names(ids: &[NodeId]) -> Vec<&str> {
        ids.iter().map(|n| n.as_str()).collect()
    }

    #[test]
    fn test_parents_before_children() {
        let nodes = vec![node("3", &["1", "2"]), node("2", &["1"]), node("1", &[])];
        let resolver = DependencyResolver::from_nodes(&nodes).unwrap();
        assert_eq!(names(&resolver.get_processing_order().unwrap()), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_isolated_nodes_included() {
        let nodes = vec![node("b", &[]), node("a", &[]), node("c", &["b"])];
        let resolver = DependencyResolver::from_nodes(&nodes).unwrap();
        assert_eq!(names(&resolver.get_processing_order().unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tie_break_visits_parents_ascending() {
        // z depends on y and x; x and y are both ready, x comes first.
        let nodes = vec![node("z", &["y", "x"]), node("y", &[]), node("x", &[])];
        let resolver = DependencyResolver::from_nodes(&nodes).unwrap();
        assert_eq!(names(&resolver.get_processing_order().unwrap()), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_cycle_detected_from_edges() {
        let scope = CanvasScope::draft(CustomerId::new("cust-1").unwrap(), CanvasId::new("c1").unwrap());
        let mut canvas = Canvas::new(scope, "cyclic");
        for n in ["1", "2", "3"] {
            canvas.upsert_node(node(n, &[]));
        }
        for (e, s, t) in [("e1", "1", "2"), ("e2", "2", "3"), ("e3", "3", "1")] {
            canvas.upsert_edge(Edge::new(EdgeId::new(e).unwrap(), id(s), id(t)));
        }

        let resolver = DependencyResolver::from_canvas(&canvas).unwrap();
        match resolver.get_processing_order() {
            Err(CoreError::CycleDetected { node, path }) => {
                assert!(["1", "2", "3"].contains(&node.as_str()));
                assert_eq!(path.len(), 3);
                assert_eq!(path[0], node);
            }
            other => panic!("expected CycleDetected, got: {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let resolver = DependencyResolver::from_nodes(&[node("a", &["a"])]).unwrap();
        match resolver.get_processing_order() {
            Err(CoreError::CycleDetected { node, path }) => {
                assert_eq!(node.as_str(), "a");
                assert_eq!(names(&path), vec!["a"]);
            }
            other => panic!("expected CycleDetected, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let err = DependencyResolver::from_nodes(&[node("svc-1", &["ghost"])]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownDependency { .. }));
    }

    #[test]
    fn test_composition_edges_ignored() {
        let scope = CanvasScope::draft(CustomerId::new("cust-1").unwrap(), CanvasId::new("c1").unwrap());
        let mut canvas = Canvas::new(scope, "composed");
        canvas.upsert_node(node("a", &[]));
        canvas.upsert_node(node("b", &[]));
        canvas.upsert_edge(
            Edge::new(EdgeId::new("e1").unwrap(), id("b"), id("a")).with_kind(EdgeKind::Composition),
        );
        let resolver = DependencyResolver::from_canvas(&canvas).unwrap();
        assert_eq!(names(&resolver.get_processing_order().unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_processing_levels() {
        let nodes = vec![
            node("api", &["svc"]),
            node("svc", &["dao", "bucket"]),
            node("dao", &["table"]),
            node("table", &[]),
            node("bucket", &[]),
        ];
        let resolver = DependencyResolver::from_nodes(&nodes).unwrap();
        let levels = resolver.processing_levels().unwrap();
        let levels: Vec<Vec<&str>> = levels.iter().map(|l| names(l)).collect();
        assert_eq!(
            levels,
            vec![vec!["bucket", "table"], vec!["dao"], vec!["svc"], vec!["api"]]
        );
    }

    #[test]
    fn test_dependents_of() {
        let nodes = vec![
            node("api", &["svc"]),
            node("svc", &["dao"]),
            node("dao", &[]),
            node("job", &[]),
        ];
        let resolver = DependencyResolver::from_nodes(&nodes).unwrap();
        assert_eq!(names(&resolver.dependents_of(&id("dao")).unwrap()), vec!["svc", "api"]);
        assert!(resolver.dependents_of(&id("job")).unwrap().is_empty());
        assert!(matches!(
            resolver.dependents_of(&id("nope")),
            Err(CoreError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let count = 50_000;
        let nodes: Vec<Node> = (0..count)
            .map(|i| {
                // Each node depends on the next one, so the first root walks
                // the whole chain.
                let n = Node::new(id(&format!("n{:06}", i)), NodeType::DataModel);
                if i + 1 == count {
                    n
                } else {
                    n.with_dependency(id(&format!("n{:06}", i + 1)))
                }
            })
            .collect();
        let resolver = DependencyResolver::from_nodes(nodes.iter().rev()).unwrap();
        let order = resolver.get_processing_order().unwrap();
        assert_eq!(order.len(), count);
        assert_eq!(order[0].as_str(), "n049999");
        assert_eq!(order[count - 1].as_str(), "n000000");
    }

    proptest! {
        #[test]
        fn order_is_independent_of_input_order(
            edges in proptest::collection::vec((0usize..12, 0usize..12), 0..30),
            seed in any::<u64>(),
        ) {
            // Only keep edges from higher to lower index so the graph is a DAG.
            let mut nodes: Vec<Node> = (0..12)
                .map(|i| Node::new(id(&format!("n{:02}", i)), NodeType::DataModel))
                .collect();
            for (a, b) in edges {
                if a > b {
                    let parent = nodes[b].id.clone();
                    nodes[a] = nodes[a].clone().with_dependency(parent);
                }
            }

            let expected = DependencyResolver::from_nodes(&nodes)
                .unwrap()
                .get_processing_order()
                .unwrap();

            let mut shuffled = nodes.clone();
            let len = shuffled.len();
            for i in 0..len {
                let j = ((seed >> (i % 60)) as usize + i * 7) % len;
                shuffled.swap(i, j);
            }
            let actual = DependencyResolver::from_nodes(&shuffled)
                .unwrap()
                .get_processing_order()
                .unwrap();

            prop_assert_eq!(&expected, &actual);
            for (pos, n) in actual.iter().enumerate() {
                let node = nodes.iter().find(|x| &x.id == n).unwrap();
                for parent in &node.depends_on {
                    let ppos = actual.iter().position(|x| x == parent).unwrap();
                    prop_assert!(ppos < pos);
                }
            }
        }
    }
}
