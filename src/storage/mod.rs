//! Storage engines
//!
//! Callers depend only on the [`StorageEngine`] capability set. Two
//! implementations are provided:
//! - [`MemoryEngine`]: transient, everything behind one reader/writer lock
//! - [`RocksEngine`]: durable, one RocksDB write batch per logical operation
//!
//! Every mutating call is atomic: the record change and the label and
//! property index maintenance it implies become visible together or not
//! at all.

pub mod memory;
pub mod rocks;

pub use memory::MemoryEngine;
pub use rocks::RocksEngine;

use crate::graph::{
    ChangeSummary, Direction, Edge, EdgeId, EdgeType, GraphError, Label, Node, NodeChange, NodeId, PropertyChange,
    PropertyMap,
};
use crate::index::{IndexPredicate, PropertyIndexKey};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Node with id {} not found", .0.as_u64())]
    NodeNotFound(NodeId),

    #[error("Relationship with id {} not found", .0.as_u64())]
    EdgeNotFound(EdgeId),

    #[error("Node with id {} already exists", .0.as_u64())]
    NodeAlreadyExists(NodeId),

    #[error("Relationship with id {} already exists", .0.as_u64())]
    EdgeAlreadyExists(EdgeId),

    #[error("Cannot delete node<{}>, because it still has relationships. To delete this node, you must first delete its relationships.", .0.as_u64())]
    NodeHasRelationships(NodeId),

    #[error("Invalid property value: {0}")]
    InvalidProperty(#[from] GraphError),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Column family error: {0}")]
    ColumnFamily(String),

    #[error("Corrupted record: {0}")]
    Corrupted(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

/// Coarse classification used by the query layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    NotFound,
    ConstraintViolation,
    InvalidArgument,
    Backend,
}

impl StorageError {
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::NodeNotFound(_) | StorageError::EdgeNotFound(_) => StorageErrorKind::NotFound,
            StorageError::NodeAlreadyExists(_)
            | StorageError::EdgeAlreadyExists(_)
            | StorageError::NodeHasRelationships(_) => StorageErrorKind::ConstraintViolation,
            StorageError::InvalidProperty(_) => StorageErrorKind::InvalidArgument,
            StorageError::RocksDb(_)
            | StorageError::Serialization(_)
            | StorageError::ColumnFamily(_)
            | StorageError::Corrupted(_)
            | StorageError::LockPoisoned(_) => StorageErrorKind::Backend,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == StorageErrorKind::NotFound
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The capability set every storage backend provides.
///
/// Reads may run concurrently with each other and with writes. Writes are
/// serialized per logical operation only.
pub trait StorageEngine: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Creates a node with a freshly allocated ID
    fn create_node(&self, labels: Vec<Label>, properties: PropertyMap) -> StorageResult<Node>;

    /// Stores a node under its own ID; fails if that ID is taken
    fn insert_node(&self, node: Node) -> StorageResult<()>;

    fn get_node(&self, id: NodeId) -> StorageResult<Node>;

    /// Applies `changes` in order as one atomic update
    fn update_node(&self, id: NodeId, changes: &[NodeChange]) -> StorageResult<(Node, ChangeSummary)>;

    /// Deletes a node. With `detach` its relationships go in the same
    /// operation; without it, a node that still has relationships is left
    /// untouched and the call fails. Returns the number of relationships
    /// removed.
    fn delete_node(&self, id: NodeId, detach: bool) -> StorageResult<usize>;

    /// Creates a relationship with a freshly allocated ID
    fn create_edge(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        properties: PropertyMap,
    ) -> StorageResult<Edge>;

    /// Stores a relationship under its own ID; fails if that ID is taken
    fn insert_edge(&self, edge: Edge) -> StorageResult<()>;

    fn get_edge(&self, id: EdgeId) -> StorageResult<Edge>;

    fn update_edge(&self, id: EdgeId, changes: &[PropertyChange]) -> StorageResult<(Edge, ChangeSummary)>;

    fn delete_edge(&self, id: EdgeId) -> StorageResult<()>;

    /// Relationships incident to `id` in the given direction. A self-loop
    /// is reported once for [`Direction::Both`].
    fn neighbors(&self, id: NodeId, direction: Direction) -> StorageResult<Vec<EdgeId>>;

    /// Node IDs carrying `label`, ascending
    fn nodes_by_label(&self, label: &Label) -> StorageResult<Vec<NodeId>>;

    /// All node IDs, ascending
    fn all_node_ids(&self) -> StorageResult<Vec<NodeId>>;

    /// All relationship IDs, ascending
    fn all_edge_ids(&self) -> StorageResult<Vec<EdgeId>>;

    /// Creates and fully backfills an index. Returns false if it already existed.
    fn create_index(&self, label: &Label, property: &str) -> StorageResult<bool>;

    /// Returns false if there was no such index
    fn drop_index(&self, label: &Label, property: &str) -> StorageResult<bool>;

    fn has_index(&self, label: &Label, property: &str) -> bool;

    fn indexes(&self) -> Vec<PropertyIndexKey>;

    /// Candidate node IDs for `predicate`, or None when no index covers
    /// (label, property). Candidates may be a superset of the matches.
    fn index_lookup(
        &self,
        label: &Label,
        property: &str,
        predicate: &IndexPredicate,
    ) -> StorageResult<Option<Vec<NodeId>>>;

    fn node_count(&self) -> StorageResult<usize>;

    fn edge_count(&self) -> StorageResult<usize>;

    /// Counter bumped by every successful write
    fn generation(&self) -> u64;

    /// Makes completed writes durable. A no-op for transient engines.
    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Like [`get_node`](Self::get_node) but absent nodes are `None`
    fn find_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        match self.get_node(id) {
            Ok(node) => Ok(Some(node)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Like [`get_edge`](Self::get_edge) but absent relationships are `None`
    fn find_edge(&self, id: EdgeId) -> StorageResult<Option<Edge>> {
        match self.get_edge(id) {
            Ok(edge) => Ok(Some(edge)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn read_guard<'a, T>(lock: &'a RwLock<T>, what: &'static str) -> StorageResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| StorageError::LockPoisoned(what))
}

pub(crate) fn write_guard<'a, T>(lock: &'a RwLock<T>, what: &'static str) -> StorageResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| StorageError::LockPoisoned(what))
}

pub(crate) fn mutex_guard<'a, T>(lock: &'a Mutex<T>, what: &'static str) -> StorageResult<MutexGuard<'a, T>> {
    lock.lock().map_err(|_| StorageError::LockPoisoned(what))
}

pub(crate) fn validate_properties(properties: &PropertyMap) -> StorageResult<()> {
    for value in properties.values() {
        value.validate().map_err(StorageError::InvalidProperty)?;
    }
    Ok(())
}

pub(crate) fn validate_changes<'a>(changes: impl IntoIterator<Item = &'a PropertyChange>) -> StorageResult<()> {
    for change in changes {
        if let PropertyChange::Set(_, value) = change {
            value.validate().map_err(StorageError::InvalidProperty)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every engine must share, run against each implementation

    use super::*;
    use crate::graph::PropertyValue;
    use std::ops::Bound;

    pub fn props(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    pub fn node_crud(engine: &dyn StorageEngine) {
        let node = engine
            .create_node(vec![Label::new("Person"), Label::new("Admin")], props(&[("name", "Alice".into())]))
            .unwrap();
        let fetched = engine.get_node(node.id).unwrap();
        assert_eq!(fetched.labels(), &[Label::new("Person"), Label::new("Admin")]);
        assert_eq!(fetched.get_property("name"), Some(&"Alice".into()));

        let (updated, summary) = engine
            .update_node(
                node.id,
                &[
                    NodeChange::Property(PropertyChange::Set("age".into(), 30i64.into())),
                    NodeChange::RemoveLabel(Label::new("Admin")),
                ],
            )
            .unwrap();
        assert_eq!(summary.properties_set, 1);
        assert_eq!(updated.labels(), &[Label::new("Person")]);
        assert!(engine.nodes_by_label(&Label::new("Admin")).unwrap().is_empty());
        assert_eq!(engine.nodes_by_label(&Label::new("Person")).unwrap(), vec![node.id]);

        assert!(matches!(engine.get_node(NodeId::new(9_999)), Err(StorageError::NodeNotFound(_))));
        assert_eq!(engine.find_node(NodeId::new(9_999)).unwrap(), None);
    }

    pub fn duplicate_insert_fails(engine: &dyn StorageEngine) {
        let node = Node::new(NodeId::new(42));
        engine.insert_node(node.clone()).unwrap();
        let err = engine.insert_node(node).unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::ConstraintViolation);
        // allocation continues past explicit IDs
        let next = engine.create_node(vec![], PropertyMap::new()).unwrap();
        assert!(next.id.as_u64() > 42);
    }

    pub fn ids_never_reused(engine: &dyn StorageEngine) {
        let a = engine.create_node(vec![], PropertyMap::new()).unwrap();
        engine.delete_node(a.id, false).unwrap();
        let b = engine.create_node(vec![], PropertyMap::new()).unwrap();
        assert_ne!(a.id, b.id);

        let e1 = engine.create_edge(b.id, b.id, EdgeType::new("SELF"), PropertyMap::new()).unwrap();
        engine.delete_edge(e1.id).unwrap();
        let e2 = engine.create_edge(b.id, b.id, EdgeType::new("SELF"), PropertyMap::new()).unwrap();
        assert_ne!(e1.id, e2.id);
    }

    pub fn edges_and_adjacency(engine: &dyn StorageEngine) {
        let a = engine.create_node(vec![], PropertyMap::new()).unwrap();
        let b = engine.create_node(vec![], PropertyMap::new()).unwrap();
        let e = engine
            .create_edge(a.id, b.id, EdgeType::new("KNOWS"), props(&[("since", 2020i64.into())]))
            .unwrap();

        assert_eq!(engine.neighbors(a.id, Direction::Outgoing).unwrap(), vec![e.id]);
        assert!(engine.neighbors(a.id, Direction::Incoming).unwrap().is_empty());
        assert_eq!(engine.neighbors(b.id, Direction::Incoming).unwrap(), vec![e.id]);
        assert_eq!(engine.neighbors(b.id, Direction::Both).unwrap(), vec![e.id]);

        let looped = engine.create_edge(a.id, a.id, EdgeType::new("SELF"), PropertyMap::new()).unwrap();
        let both = engine.neighbors(a.id, Direction::Both).unwrap();
        assert_eq!(both.iter().filter(|id| **id == looped.id).count(), 1);

        let (edge, _) = engine
            .update_edge(e.id, &[PropertyChange::Set("weight".into(), 0.5.into())])
            .unwrap();
        assert_eq!(edge.get_property("weight"), Some(&PropertyValue::Float(0.5)));

        let missing = engine.create_edge(a.id, NodeId::new(12_345), EdgeType::new("X"), PropertyMap::new());
        assert!(matches!(missing, Err(StorageError::NodeNotFound(_))));
        assert_eq!(engine.edge_count().unwrap(), 2);
    }

    pub fn delete_requires_detach(engine: &dyn StorageEngine) {
        let hub = engine.create_node(vec![Label::new("Hub")], PropertyMap::new()).unwrap();
        let mut spokes = Vec::new();
        for _ in 0..3 {
            let s = engine.create_node(vec![], PropertyMap::new()).unwrap();
            engine.create_edge(hub.id, s.id, EdgeType::new("LINK"), PropertyMap::new()).unwrap();
            spokes.push(s);
        }
        engine.create_edge(spokes[0].id, hub.id, EdgeType::new("BACK"), PropertyMap::new()).unwrap();

        let err = engine.delete_node(hub.id, false).unwrap_err();
        assert_eq!(err.kind(), StorageErrorKind::ConstraintViolation);
        assert_eq!(engine.edge_count().unwrap(), 4);

        assert_eq!(engine.delete_node(hub.id, true).unwrap(), 4);
        assert_eq!(engine.edge_count().unwrap(), 0);
        assert!(engine.find_node(hub.id).unwrap().is_none());
        assert!(engine.neighbors(spokes[0].id, Direction::Both).unwrap().is_empty());
        assert!(engine.nodes_by_label(&Label::new("Hub")).unwrap().is_empty());
    }

    pub fn index_tracks_writes(engine: &dyn StorageEngine) {
        let person = Label::new("Person");
        let a = engine.create_node(vec![person.clone()], props(&[("age", 30i64.into())])).unwrap();

        assert!(engine.create_index(&person, "age").unwrap());
        assert!(!engine.create_index(&person, "age").unwrap());
        assert!(engine.has_index(&person, "age"));

        let eq = |v: i64| IndexPredicate::Equals(PropertyValue::Integer(v));
        assert_eq!(engine.index_lookup(&person, "age", &eq(30)).unwrap(), Some(vec![a.id]));

        let b = engine.create_node(vec![person.clone()], props(&[("age", 40i64.into())])).unwrap();
        engine
            .update_node(a.id, &[NodeChange::Property(PropertyChange::Set("age".into(), 31i64.into()))])
            .unwrap();
        assert_eq!(engine.index_lookup(&person, "age", &eq(30)).unwrap(), Some(vec![]));
        assert_eq!(engine.index_lookup(&person, "age", &eq(31)).unwrap(), Some(vec![a.id]));

        let range = IndexPredicate::Range {
            lower: Bound::Included(PropertyValue::Integer(35)),
            upper: Bound::Unbounded,
        };
        assert_eq!(engine.index_lookup(&person, "age", &range).unwrap(), Some(vec![b.id]));

        engine.update_node(b.id, &[NodeChange::RemoveLabel(person.clone())]).unwrap();
        assert_eq!(engine.index_lookup(&person, "age", &eq(40)).unwrap(), Some(vec![]));

        engine.delete_node(a.id, false).unwrap();
        assert_eq!(engine.index_lookup(&person, "age", &eq(31)).unwrap(), Some(vec![]));

        assert!(engine.drop_index(&person, "age").unwrap());
        assert!(!engine.drop_index(&person, "age").unwrap());
        assert_eq!(engine.index_lookup(&person, "age", &eq(31)).unwrap(), None);
    }

    pub fn rejects_unstorable_values(engine: &dyn StorageEngine) {
        let mixed = PropertyValue::List(vec![1i64.into(), "a".into()]);
        let result = engine.create_node(vec![], props(&[("bad", mixed)]));
        assert!(matches!(result, Err(StorageError::InvalidProperty(_))));
        assert_eq!(engine.node_count().unwrap(), 0);
    }

    pub fn generation_advances(engine: &dyn StorageEngine) {
        let before = engine.generation();
        engine.create_node(vec![], PropertyMap::new()).unwrap();
        assert!(engine.generation() > before);
        let after = engine.generation();
        let _ = engine.get_node(NodeId::new(0));
        assert_eq!(engine.generation(), after);
    }
}
