//! Transient in-memory storage engine
//!
//! Layout:
//! - nodes: NodeId -> Node
//! - edges: EdgeId -> Edge
//! - outgoing / incoming: NodeId -> Vec<EdgeId> adjacency lists
//! - label_index: Label -> NodeId set
//! - property indexes
//!
//! All of it sits behind a single `RwLock`; readers share it and each
//! logical write holds it exclusively only for its own duration.

use super::{
    read_guard, validate_changes, validate_properties, write_guard, StorageEngine, StorageError, StorageResult,
};
use crate::graph::{
    apply_edge_changes, apply_node_changes, ChangeSummary, Direction, Edge, EdgeId, EdgeType, Label, Node,
    NodeChange, NodeId, PropertyChange, PropertyMap,
};
use crate::index::{IndexManager, IndexPredicate, PropertyIndexKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    outgoing: HashMap<NodeId, Vec<EdgeId>>,
    incoming: HashMap<NodeId, Vec<EdgeId>>,
    label_index: HashMap<Label, BTreeSet<NodeId>>,
    indexes: IndexManager,
    next_node_id: u64,
    next_edge_id: u64,
}

impl MemoryGraph {
    fn put_node(&mut self, node: Node) {
        for label in node.labels() {
            self.label_index.entry(label.clone()).or_default().insert(node.id);
        }
        self.indexes.insert_node(&node);
        self.next_node_id = self.next_node_id.max(node.id.as_u64() + 1);
        self.nodes.insert(node.id, node);
    }

    fn put_edge(&mut self, edge: Edge) {
        self.outgoing.entry(edge.source).or_default().push(edge.id);
        self.incoming.entry(edge.target).or_default().push(edge.id);
        self.next_edge_id = self.next_edge_id.max(edge.id.as_u64() + 1);
        self.edges.insert(edge.id, edge);
    }

    fn unlink_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&id)?;
        if let Some(out) = self.outgoing.get_mut(&edge.source) {
            out.retain(|e| *e != id);
        }
        if let Some(inc) = self.incoming.get_mut(&edge.target) {
            inc.retain(|e| *e != id);
        }
        Some(edge)
    }

    fn incident(&self, id: NodeId, direction: Direction) -> Vec<EdgeId> {
        let out = self.outgoing.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        let inc = self.incoming.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        match direction {
            Direction::Outgoing => out.to_vec(),
            Direction::Incoming => inc.to_vec(),
            Direction::Both => {
                let mut all = out.to_vec();
                // self-loops appear in both lists
                all.extend(inc.iter().filter(|e| !out.contains(e)));
                all
            }
        }
    }
}

/// In-memory storage engine
#[derive(Debug, Default)]
pub struct MemoryEngine {
    graph: RwLock<MemoryGraph>,
    generation: AtomicU64,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl StorageEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_node(&self, labels: Vec<Label>, properties: PropertyMap) -> StorageResult<Node> {
        validate_properties(&properties)?;
        let mut graph = write_guard(&self.graph, "memory graph")?;
        let id = NodeId::new(graph.next_node_id);
        let node = Node::with_labels_and_properties(id, labels, properties);
        graph.put_node(node.clone());
        drop(graph);
        self.bump();
        debug!("Created {}", id);
        Ok(node)
    }

    fn insert_node(&self, node: Node) -> StorageResult<()> {
        validate_properties(&node.properties)?;
        let mut graph = write_guard(&self.graph, "memory graph")?;
        if graph.nodes.contains_key(&node.id) {
            return Err(StorageError::NodeAlreadyExists(node.id));
        }
        graph.put_node(node);
        drop(graph);
        self.bump();
        Ok(())
    }

    fn get_node(&self, id: NodeId) -> StorageResult<Node> {
        let graph = read_guard(&self.graph, "memory graph")?;
        graph.nodes.get(&id).cloned().ok_or(StorageError::NodeNotFound(id))
    }

    fn update_node(&self, id: NodeId, changes: &[NodeChange]) -> StorageResult<(Node, ChangeSummary)> {
        validate_changes(changes.iter().filter_map(|c| match c {
            NodeChange::Property(p) => Some(p),
            _ => None,
        }))?;
        let mut graph = write_guard(&self.graph, "memory graph")?;
        let current = graph.nodes.get(&id).ok_or(StorageError::NodeNotFound(id))?;
        let (updated, summary) = apply_node_changes(current, changes);

        let old = graph.nodes.insert(id, updated.clone()).ok_or(StorageError::NodeNotFound(id))?;
        for label in old.labels() {
            if !updated.has_label(label) {
                if let Some(ids) = graph.label_index.get_mut(label) {
                    ids.remove(&id);
                }
            }
        }
        for label in updated.labels() {
            graph.label_index.entry(label.clone()).or_default().insert(id);
        }
        graph.indexes.replace_node(&old, &updated);
        drop(graph);
        self.bump();
        Ok((updated, summary))
    }

    fn delete_node(&self, id: NodeId, detach: bool) -> StorageResult<usize> {
        let mut graph = write_guard(&self.graph, "memory graph")?;
        if !graph.nodes.contains_key(&id) {
            return Err(StorageError::NodeNotFound(id));
        }
        let incident = graph.incident(id, Direction::Both);
        if !incident.is_empty() && !detach {
            return Err(StorageError::NodeHasRelationships(id));
        }
        for edge_id in &incident {
            graph.unlink_edge(*edge_id);
        }
        graph.outgoing.remove(&id);
        graph.incoming.remove(&id);
        if let Some(node) = graph.nodes.remove(&id) {
            for label in node.labels() {
                if let Some(ids) = graph.label_index.get_mut(label) {
                    ids.remove(&id);
                }
            }
            graph.indexes.remove_node(&node);
        }
        drop(graph);
        self.bump();
        debug!("Deleted {} with {} relationships", id, incident.len());
        Ok(incident.len())
    }

    fn create_edge(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        properties: PropertyMap,
    ) -> StorageResult<Edge> {
        validate_properties(&properties)?;
        let mut graph = write_guard(&self.graph, "memory graph")?;
        for endpoint in [source, target] {
            if !graph.nodes.contains_key(&endpoint) {
                return Err(StorageError::NodeNotFound(endpoint));
            }
        }
        let id = EdgeId::new(graph.next_edge_id);
        let edge = Edge::new(id, source, target, edge_type, properties);
        graph.put_edge(edge.clone());
        drop(graph);
        self.bump();
        debug!("Created {} from {} to {}", id, source, target);
        Ok(edge)
    }

    fn insert_edge(&self, edge: Edge) -> StorageResult<()> {
        validate_properties(&edge.properties)?;
        let mut graph = write_guard(&self.graph, "memory graph")?;
        if graph.edges.contains_key(&edge.id) {
            return Err(StorageError::EdgeAlreadyExists(edge.id));
        }
        for endpoint in [edge.source, edge.target] {
            if !graph.nodes.contains_key(&endpoint) {
                return Err(StorageError::NodeNotFound(endpoint));
            }
        }
        graph.put_edge(edge);
        drop(graph);
        self.bump();
        Ok(())
    }

    fn get_edge(&self, id: EdgeId) -> StorageResult<Edge> {
        let graph = read_guard(&self.graph, "memory graph")?;
        graph.edges.get(&id).cloned().ok_or(StorageError::EdgeNotFound(id))
    }

    fn update_edge(&self, id: EdgeId, changes: &[PropertyChange]) -> StorageResult<(Edge, ChangeSummary)> {
        validate_changes(changes)?;
        let mut graph = write_guard(&self.graph, "memory graph")?;
        let current = graph.edges.get_mut(&id).ok_or(StorageError::EdgeNotFound(id))?;
        let (updated, summary) = apply_edge_changes(current, changes);
        *current = updated.clone();
        drop(graph);
        self.bump();
        Ok((updated, summary))
    }

    fn delete_edge(&self, id: EdgeId) -> StorageResult<()> {
        let mut graph = write_guard(&self.graph, "memory graph")?;
        graph.unlink_edge(id).ok_or(StorageError::EdgeNotFound(id))?;
        drop(graph);
        self.bump();
        Ok(())
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> StorageResult<Vec<EdgeId>> {
        let graph = read_guard(&self.graph, "memory graph")?;
        Ok(graph.incident(id, direction))
    }

    fn nodes_by_label(&self, label: &Label) -> StorageResult<Vec<NodeId>> {
        let graph = read_guard(&self.graph, "memory graph")?;
        Ok(graph
            .label_index
            .get(label)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn all_node_ids(&self) -> StorageResult<Vec<NodeId>> {
        let graph = read_guard(&self.graph, "memory graph")?;
        Ok(graph.nodes.keys().copied().collect())
    }

    fn all_edge_ids(&self) -> StorageResult<Vec<EdgeId>> {
        let graph = read_guard(&self.graph, "memory graph")?;
        Ok(graph.edges.keys().copied().collect())
    }

    fn create_index(&self, label: &Label, property: &str) -> StorageResult<bool> {
        let mut guard = write_guard(&self.graph, "memory graph")?;
        let graph = &mut *guard;
        let key = PropertyIndexKey::new(label.clone(), property);
        let created = graph.indexes.create_index(key, graph.nodes.values());
        drop(guard);
        if created {
            self.bump();
            debug!("Created index on :{}({})", label, property);
        }
        Ok(created)
    }

    fn drop_index(&self, label: &Label, property: &str) -> StorageResult<bool> {
        let mut graph = write_guard(&self.graph, "memory graph")?;
        let dropped = graph.indexes.drop_index(&PropertyIndexKey::new(label.clone(), property));
        drop(graph);
        if dropped {
            self.bump();
        }
        Ok(dropped)
    }

    fn has_index(&self, label: &Label, property: &str) -> bool {
        read_guard(&self.graph, "memory graph")
            .map(|g| g.indexes.has_index(label, property))
            .unwrap_or(false)
    }

    fn indexes(&self) -> Vec<PropertyIndexKey> {
        read_guard(&self.graph, "memory graph")
            .map(|g| g.indexes.definitions())
            .unwrap_or_default()
    }

    fn index_lookup(
        &self,
        label: &Label,
        property: &str,
        predicate: &IndexPredicate,
    ) -> StorageResult<Option<Vec<NodeId>>> {
        let graph = read_guard(&self.graph, "memory graph")?;
        Ok(graph.indexes.lookup(label, property, predicate))
    }

    fn node_count(&self) -> StorageResult<usize> {
        Ok(read_guard(&self.graph, "memory graph")?.nodes.len())
    }

    fn edge_count(&self) -> StorageResult<usize> {
        Ok(read_guard(&self.graph, "memory graph")?.edges.len())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
