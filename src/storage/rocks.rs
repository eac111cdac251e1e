//! Durable RocksDB storage engine
//!
//! Column families:
//! - `nodes`:     node id -> bincode(StoredNode)
//! - `edges`:     edge id -> bincode(StoredEdge)
//! - `adjacency`: node id | direction | edge id -> ()
//! - `labels`:    label length | label | node id -> ()
//! - `meta`:      ID counters and index definitions
//!
//! Each logical operation is one `WriteBatch`, so a crash leaves either
//! all of it or none of it. Writers are serialized by a mutex. Property
//! indexes live in memory: they are rebuilt from the `nodes` family on
//! open and updated under their lock together with the batch commit.

use super::{
    mutex_guard, read_guard, validate_changes, validate_properties, write_guard, StorageEngine, StorageError,
    StorageResult,
};
use crate::graph::{
    apply_edge_changes, apply_node_changes, ChangeSummary, Direction, Edge, EdgeId, EdgeType, Label, Node,
    NodeChange, NodeId, PropertyChange, PropertyMap,
};
use crate::index::{IndexManager, IndexPredicate, PropertyIndexKey};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

const CF_NODES: &str = "nodes";
const CF_EDGES: &str = "edges";
const CF_ADJACENCY: &str = "adjacency";
const CF_LABELS: &str = "labels";
const CF_META: &str = "meta";

const META_NEXT_NODE: &[u8] = b"next_node_id";
const META_NEXT_EDGE: &[u8] = b"next_edge_id";
const META_INDEX_PREFIX: &[u8] = b"index:";

const DIR_OUT: u8 = 0;
const DIR_IN: u8 = 1;

/// Serialized node for storage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredNode {
    labels: Vec<String>,
    properties: PropertyMap,
}

/// Serialized edge for storage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEdge {
    source: u64,
    target: u64,
    edge_type: String,
    properties: PropertyMap,
}

/// RocksDB-backed storage engine
pub struct RocksEngine {
    db: DB,
    path: PathBuf,
    write_lock: Mutex<()>,
    indexes: RwLock<IndexManager>,
    next_node_id: AtomicU64,
    next_edge_id: AtomicU64,
    generation: AtomicU64,
}

impl RocksEngine {
    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening RocksDB storage at {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(3);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::PointInTime);

        let cf_descriptors = [CF_NODES, CF_EDGES, CF_ADJACENCY, CF_LABELS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Self::cf_options()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        let engine = RocksEngine {
            db,
            path,
            write_lock: Mutex::new(()),
            indexes: RwLock::new(IndexManager::new()),
            next_node_id: AtomicU64::new(0),
            next_edge_id: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        };
        engine.recover()?;
        Ok(engine)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf(&self, name: &str) -> StorageResult<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamily(name.to_string()))
    }

    /// Loads ID counters and rebuilds property indexes
    fn recover(&self) -> StorageResult<()> {
        let meta = self.cf(CF_META)?;
        if let Some(raw) = self.db.get_cf(meta, META_NEXT_NODE)? {
            self.next_node_id.store(decode_u64(&raw)?, Ordering::Release);
        }
        if let Some(raw) = self.db.get_cf(meta, META_NEXT_EDGE)? {
            self.next_edge_id.store(decode_u64(&raw)?, Ordering::Release);
        }

        let definitions = self
            .scan_keys(CF_META, META_INDEX_PREFIX)?
            .into_iter()
            .map(|key| decode_index_key(&key[META_INDEX_PREFIX.len()..]))
            .collect::<StorageResult<Vec<_>>>()?;

        if !definitions.is_empty() {
            let nodes = self.scan_nodes()?;
            let mut indexes = write_guard(&self.indexes, "rocks indexes")?;
            for key in definitions {
                indexes.create_index(key, nodes.iter());
            }
        }

        info!(
            "RocksDB storage ready: next node id {}, next relationship id {}",
            self.next_node_id.load(Ordering::Acquire),
            self.next_edge_id.load(Ordering::Acquire)
        );
        Ok(())
    }

    fn scan_keys(&self, cf_name: &str, prefix: &[u8]) -> StorageResult<Vec<Box<[u8]>>> {
        let cf = self.cf(cf_name)?;
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, rocksdb::Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    fn scan_nodes(&self) -> StorageResult<Vec<Node>> {
        let cf = self.cf(CF_NODES)?;
        let mut nodes = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            nodes.push(decode_node(NodeId::new(decode_u64(&key)?), &value)?);
        }
        Ok(nodes)
    }

    fn load_node(&self, id: NodeId) -> StorageResult<Option<Node>> {
        let cf = self.cf(CF_NODES)?;
        match self.db.get_cf(cf, id.as_u64().to_be_bytes())? {
            Some(raw) => Ok(Some(decode_node(id, &raw)?)),
            None => Ok(None),
        }
    }

    fn load_edge(&self, id: EdgeId) -> StorageResult<Option<Edge>> {
        let cf = self.cf(CF_EDGES)?;
        match self.db.get_cf(cf, id.as_u64().to_be_bytes())? {
            Some(raw) => Ok(Some(decode_edge(id, &raw)?)),
            None => Ok(None),
        }
    }

    fn node_exists(&self, id: NodeId) -> StorageResult<bool> {
        let cf = self.cf(CF_NODES)?;
        Ok(self.db.get_pinned_cf(cf, id.as_u64().to_be_bytes())?.is_some())
    }

    fn adjacent(&self, id: NodeId, dir: u8) -> StorageResult<Vec<EdgeId>> {
        let mut prefix = id.as_u64().to_be_bytes().to_vec();
        prefix.push(dir);
        self.scan_keys(CF_ADJACENCY, &prefix)?
            .iter()
            .map(|key| decode_u64(&key[prefix.len()..]).map(EdgeId::new))
            .collect()
    }

    fn put_node_in_batch(&self, batch: &mut WriteBatch, node: &Node) -> StorageResult<()> {
        let stored = StoredNode {
            labels: node.labels().iter().map(|l| l.as_str().to_string()).collect(),
            properties: node.properties.clone(),
        };
        batch.put_cf(self.cf(CF_NODES)?, node.id.as_u64().to_be_bytes(), bincode::serialize(&stored)?);
        Ok(())
    }

    fn put_edge_in_batch(&self, batch: &mut WriteBatch, edge: &Edge) -> StorageResult<()> {
        let stored = StoredEdge {
            source: edge.source.as_u64(),
            target: edge.target.as_u64(),
            edge_type: edge.edge_type.as_str().to_string(),
            properties: edge.properties.clone(),
        };
        batch.put_cf(self.cf(CF_EDGES)?, edge.id.as_u64().to_be_bytes(), bincode::serialize(&stored)?);
        Ok(())
    }

    fn link_edge_in_batch(&self, batch: &mut WriteBatch, edge: &Edge) -> StorageResult<()> {
        let adjacency = self.cf(CF_ADJACENCY)?;
        batch.put_cf(adjacency, adjacency_key(edge.source, DIR_OUT, edge.id), b"");
        batch.put_cf(adjacency, adjacency_key(edge.target, DIR_IN, edge.id), b"");
        Ok(())
    }

    fn unlink_edge_in_batch(&self, batch: &mut WriteBatch, edge: &Edge) -> StorageResult<()> {
        let adjacency = self.cf(CF_ADJACENCY)?;
        batch.delete_cf(self.cf(CF_EDGES)?, edge.id.as_u64().to_be_bytes());
        batch.delete_cf(adjacency, adjacency_key(edge.source, DIR_OUT, edge.id));
        batch.delete_cf(adjacency, adjacency_key(edge.target, DIR_IN, edge.id));
        Ok(())
    }

    fn allocate_node_id(&self, batch: &mut WriteBatch) -> StorageResult<NodeId> {
        let id = self.next_node_id.fetch_add(1, Ordering::AcqRel);
        batch.put_cf(self.cf(CF_META)?, META_NEXT_NODE, (id + 1).to_be_bytes());
        Ok(NodeId::new(id))
    }

    fn allocate_edge_id(&self, batch: &mut WriteBatch) -> StorageResult<EdgeId> {
        let id = self.next_edge_id.fetch_add(1, Ordering::AcqRel);
        batch.put_cf(self.cf(CF_META)?, META_NEXT_EDGE, (id + 1).to_be_bytes());
        Ok(EdgeId::new(id))
    }

    /// Commits a batch that also changes index-visible node state
    fn commit_with_index(&self, batch: WriteBatch, update: impl FnOnce(&mut IndexManager)) -> StorageResult<()> {
        let mut indexes = write_guard(&self.indexes, "rocks indexes")?;
        self.db.write(batch)?;
        update(&mut indexes);
        drop(indexes);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> StorageResult<()> {
        self.db.write(batch)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn store_new_node(&self, node: &Node, mut batch: WriteBatch) -> StorageResult<()> {
        self.put_node_in_batch(&mut batch, node)?;
        let labels = self.cf(CF_LABELS)?;
        for label in node.labels() {
            batch.put_cf(labels, label_key(label, node.id), b"");
        }
        self.commit_with_index(batch, |indexes| indexes.insert_node(node))
    }
}

impl StorageEngine for RocksEngine {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn create_node(&self, labels: Vec<Label>, properties: PropertyMap) -> StorageResult<Node> {
        validate_properties(&properties)?;
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        let mut batch = WriteBatch::default();
        let id = self.allocate_node_id(&mut batch)?;
        let node = Node::with_labels_and_properties(id, labels, properties);
        self.store_new_node(&node, batch)?;
        debug!("Created {}", id);
        Ok(node)
    }

    fn insert_node(&self, node: Node) -> StorageResult<()> {
        validate_properties(&node.properties)?;
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        if self.node_exists(node.id)? {
            return Err(StorageError::NodeAlreadyExists(node.id));
        }
        let mut batch = WriteBatch::default();
        let next = node.id.as_u64() + 1;
        if next > self.next_node_id.load(Ordering::Acquire) {
            self.next_node_id.store(next, Ordering::Release);
            batch.put_cf(self.cf(CF_META)?, META_NEXT_NODE, next.to_be_bytes());
        }
        self.store_new_node(&node, batch)
    }

    fn get_node(&self, id: NodeId) -> StorageResult<Node> {
        self.load_node(id)?.ok_or(StorageError::NodeNotFound(id))
    }

    fn update_node(&self, id: NodeId, changes: &[NodeChange]) -> StorageResult<(Node, ChangeSummary)> {
        validate_changes(changes.iter().filter_map(|c| match c {
            NodeChange::Property(p) => Some(p),
            _ => None,
        }))?;
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        let current = self.get_node(id)?;
        let (updated, summary) = apply_node_changes(&current, changes);

        let mut batch = WriteBatch::default();
        self.put_node_in_batch(&mut batch, &updated)?;
        let labels = self.cf(CF_LABELS)?;
        for label in current.labels() {
            if !updated.has_label(label) {
                batch.delete_cf(labels, label_key(label, id));
            }
        }
        for label in updated.labels() {
            if !current.has_label(label) {
                batch.put_cf(labels, label_key(label, id), b"");
            }
        }
        self.commit_with_index(batch, |indexes| indexes.replace_node(&current, &updated))?;
        Ok((updated, summary))
    }

    fn delete_node(&self, id: NodeId, detach: bool) -> StorageResult<usize> {
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        let node = self.get_node(id)?;
        let incident = self.neighbors(id, Direction::Both)?;
        if !incident.is_empty() && !detach {
            return Err(StorageError::NodeHasRelationships(id));
        }

        let mut batch = WriteBatch::default();
        for edge_id in &incident {
            let edge = self
                .load_edge(*edge_id)?
                .ok_or_else(|| StorageError::Corrupted(format!("dangling adjacency entry for {}", edge_id)))?;
            self.unlink_edge_in_batch(&mut batch, &edge)?;
        }
        batch.delete_cf(self.cf(CF_NODES)?, id.as_u64().to_be_bytes());
        let labels = self.cf(CF_LABELS)?;
        for label in node.labels() {
            batch.delete_cf(labels, label_key(label, id));
        }
        self.commit_with_index(batch, |indexes| indexes.remove_node(&node))?;
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
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        for endpoint in [source, target] {
            if !self.node_exists(endpoint)? {
                return Err(StorageError::NodeNotFound(endpoint));
            }
        }
        let mut batch = WriteBatch::default();
        let id = self.allocate_edge_id(&mut batch)?;
        let edge = Edge::new(id, source, target, edge_type, properties);
        self.put_edge_in_batch(&mut batch, &edge)?;
        self.link_edge_in_batch(&mut batch, &edge)?;
        self.commit(batch)?;
        debug!("Created {} from {} to {}", id, source, target);
        Ok(edge)
    }

    fn insert_edge(&self, edge: Edge) -> StorageResult<()> {
        validate_properties(&edge.properties)?;
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        if self.load_edge(edge.id)?.is_some() {
            return Err(StorageError::EdgeAlreadyExists(edge.id));
        }
        for endpoint in [edge.source, edge.target] {
            if !self.node_exists(endpoint)? {
                return Err(StorageError::NodeNotFound(endpoint));
            }
        }
        let mut batch = WriteBatch::default();
        let next = edge.id.as_u64() + 1;
        if next > self.next_edge_id.load(Ordering::Acquire) {
            self.next_edge_id.store(next, Ordering::Release);
            batch.put_cf(self.cf(CF_META)?, META_NEXT_EDGE, next.to_be_bytes());
        }
        self.put_edge_in_batch(&mut batch, &edge)?;
        self.link_edge_in_batch(&mut batch, &edge)?;
        self.commit(batch)
    }

    fn get_edge(&self, id: EdgeId) -> StorageResult<Edge> {
        self.load_edge(id)?.ok_or(StorageError::EdgeNotFound(id))
    }

    fn update_edge(&self, id: EdgeId, changes: &[PropertyChange]) -> StorageResult<(Edge, ChangeSummary)> {
        validate_changes(changes)?;
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        let current = self.get_edge(id)?;
        let (updated, summary) = apply_edge_changes(&current, changes);
        let mut batch = WriteBatch::default();
        self.put_edge_in_batch(&mut batch, &updated)?;
        self.commit(batch)?;
        Ok((updated, summary))
    }

    fn delete_edge(&self, id: EdgeId) -> StorageResult<()> {
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        let edge = self.get_edge(id)?;
        let mut batch = WriteBatch::default();
        self.unlink_edge_in_batch(&mut batch, &edge)?;
        self.commit(batch)
    }

    fn neighbors(&self, id: NodeId, direction: Direction) -> StorageResult<Vec<EdgeId>> {
        match direction {
            Direction::Outgoing => self.adjacent(id, DIR_OUT),
            Direction::Incoming => self.adjacent(id, DIR_IN),
            Direction::Both => {
                let mut all = self.adjacent(id, DIR_OUT)?;
                let incoming = self.adjacent(id, DIR_IN)?;
                let loops: Vec<EdgeId> = incoming.iter().filter(|e| all.contains(e)).copied().collect();
                all.extend(incoming.into_iter().filter(|e| !loops.contains(e)));
                Ok(all)
            }
        }
    }

    fn nodes_by_label(&self, label: &Label) -> StorageResult<Vec<NodeId>> {
        let prefix = label_prefix(label);
        self.scan_keys(CF_LABELS, &prefix)?
            .iter()
            .map(|key| decode_u64(&key[prefix.len()..]).map(NodeId::new))
            .collect()
    }

    fn all_node_ids(&self) -> StorageResult<Vec<NodeId>> {
        self.scan_keys(CF_NODES, &[])?
            .iter()
            .map(|key| decode_u64(key).map(NodeId::new))
            .collect()
    }

    fn all_edge_ids(&self) -> StorageResult<Vec<EdgeId>> {
        self.scan_keys(CF_EDGES, &[])?
            .iter()
            .map(|key| decode_u64(key).map(EdgeId::new))
            .collect()
    }

    fn create_index(&self, label: &Label, property: &str) -> StorageResult<bool> {
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        if self.has_index(label, property) {
            return Ok(false);
        }
        let key = PropertyIndexKey::new(label.clone(), property);
        let mut nodes = Vec::new();
        for id in self.nodes_by_label(label)? {
            if let Some(node) = self.load_node(id)? {
                nodes.push(node);
            }
        }
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_META)?, meta_index_key(&key), b"");
        self.commit_with_index(batch, |indexes| {
            indexes.create_index(key, nodes.iter());
        })?;
        info!("Created index on :{}({}) over {} nodes", label, property, nodes.len());
        Ok(true)
    }

    fn drop_index(&self, label: &Label, property: &str) -> StorageResult<bool> {
        let _writer = mutex_guard(&self.write_lock, "rocks writer")?;
        if !self.has_index(label, property) {
            return Ok(false);
        }
        let key = PropertyIndexKey::new(label.clone(), property);
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_META)?, meta_index_key(&key));
        self.commit_with_index(batch, |indexes| {
            indexes.drop_index(&key);
        })?;
        info!("Dropped index on :{}({})", label, property);
        Ok(true)
    }

    fn has_index(&self, label: &Label, property: &str) -> bool {
        read_guard(&self.indexes, "rocks indexes")
            .map(|i| i.has_index(label, property))
            .unwrap_or(false)
    }

    fn indexes(&self) -> Vec<PropertyIndexKey> {
        read_guard(&self.indexes, "rocks indexes")
            .map(|i| i.definitions())
            .unwrap_or_default()
    }

    fn index_lookup(
        &self,
        label: &Label,
        property: &str,
        predicate: &IndexPredicate,
    ) -> StorageResult<Option<Vec<NodeId>>> {
        Ok(read_guard(&self.indexes, "rocks indexes")?.lookup(label, property, predicate))
    }

    fn node_count(&self) -> StorageResult<usize> {
        Ok(self.scan_keys(CF_NODES, &[])?.len())
    }

    fn edge_count(&self) -> StorageResult<usize> {
        Ok(self.scan_keys(CF_EDGES, &[])?.len())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn flush(&self) -> StorageResult<()> {
        for name in [CF_NODES, CF_EDGES, CF_ADJACENCY, CF_LABELS, CF_META] {
            self.db.flush_cf(self.cf(name)?)?;
        }
        debug!("Flushed storage to disk");
        Ok(())
    }
}

fn decode_u64(bytes: &[u8]) -> StorageResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupted(format!("expected 8-byte id, found {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

fn decode_node(id: NodeId, raw: &[u8]) -> StorageResult<Node> {
    let stored: StoredNode = bincode::deserialize(raw)?;
    Ok(Node::with_labels_and_properties(
        id,
        stored.labels.into_iter().map(Label::new),
        stored.properties,
    ))
}

fn decode_edge(id: EdgeId, raw: &[u8]) -> StorageResult<Edge> {
    let stored: StoredEdge = bincode::deserialize(raw)?;
    Ok(Edge::new(
        id,
        NodeId::new(stored.source),
        NodeId::new(stored.target),
        EdgeType::new(stored.edge_type),
        stored.properties,
    ))
}

fn adjacency_key(node: NodeId, dir: u8, edge: EdgeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.extend_from_slice(&node.as_u64().to_be_bytes());
    key.push(dir);
    key.extend_from_slice(&edge.as_u64().to_be_bytes());
    key
}

fn label_prefix(label: &Label) -> Vec<u8> {
    let bytes = label.as_str().as_bytes();
    let mut key = Vec::with_capacity(4 + bytes.len() + 8);
    key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

fn label_key(label: &Label, node: NodeId) -> Vec<u8> {
    let mut key = label_prefix(label);
    key.extend_from_slice(&node.as_u64().to_be_bytes());
    key
}

fn meta_index_key(key: &PropertyIndexKey) -> Vec<u8> {
    let mut raw = META_INDEX_PREFIX.to_vec();
    raw.extend_from_slice(&label_prefix(&key.label));
    raw.extend_from_slice(key.property.as_bytes());
    raw
}

fn decode_index_key(raw: &[u8]) -> StorageResult<PropertyIndexKey> {
    let corrupted = || StorageError::Corrupted("malformed index definition".to_string());
    let len_bytes: [u8; 4] = raw.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(corrupted)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let label = raw.get(4..4 + len).ok_or_else(corrupted)?;
    let property = raw.get(4 + len..).ok_or_else(corrupted)?;
    let label = String::from_utf8(label.to_vec()).map_err(|_| corrupted())?;
    let property = String::from_utf8(property.to_vec()).map_err(|_| corrupted())?;
    Ok(PropertyIndexKey::new(Label::new(label), property))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PropertyValue;
    use crate::storage::conformance;
    use tempfile::TempDir;

    fn open() -> (TempDir, RocksEngine) {
        let dir = TempDir::new().unwrap();
        let engine = RocksEngine::open(dir.path()).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_node_crud() {
        let (_dir, engine) = open();
        conformance::node_crud(&engine);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let (_dir, engine) = open();
        conformance::duplicate_insert_fails(&engine);
    }

    #[test]
    fn test_ids_never_reused() {
        let (_dir, engine) = open();
        conformance::ids_never_reused(&engine);
    }

    #[test]
    fn test_edges_and_adjacency() {
        let (_dir, engine) = open();
        conformance::edges_and_adjacency(&engine);
    }

    #[test]
    fn test_delete_requires_detach() {
        let (_dir, engine) = open();
        conformance::delete_requires_detach(&engine);
    }

    #[test]
    fn test_index_tracks_writes() {
        let (_dir, engine) = open();
        conformance::index_tracks_writes(&engine);
    }

    #[test]
    fn test_rejects_unstorable_values() {
        let (_dir, engine) = open();
        conformance::rejects_unstorable_values(&engine);
    }

    #[test]
    fn test_generation_advances() {
        let (_dir, engine) = open();
        conformance::generation_advances(&engine);
    }

    #[test]
    fn test_reopen_restores_data_counters_and_indexes() {
        let dir = TempDir::new().unwrap();
        let person = Label::new("Person");
        let (a, b, deleted) = {
            let engine = RocksEngine::open(dir.path()).unwrap();
            let a = engine
                .create_node(vec![person.clone()], conformance::props(&[("name", "Alice".into())]))
                .unwrap();
            let b = engine.create_node(vec![], PropertyMap::new()).unwrap();
            let gone = engine.create_node(vec![], PropertyMap::new()).unwrap();
            engine.delete_node(gone.id, false).unwrap();
            engine.create_edge(a.id, b.id, EdgeType::new("KNOWS"), PropertyMap::new()).unwrap();
            engine.create_index(&person, "name").unwrap();
            engine.flush().unwrap();
            (a, b, gone)
        };

        let engine = RocksEngine::open(dir.path()).unwrap();
        assert_eq!(engine.node_count().unwrap(), 2);
        assert_eq!(engine.get_node(a.id).unwrap().labels(), &[person.clone()]);
        assert_eq!(engine.neighbors(b.id, Direction::Incoming).unwrap().len(), 1);
        assert!(engine.has_index(&person, "name"));
        let hits = engine
            .index_lookup(&person, "name", &IndexPredicate::Equals(PropertyValue::from("Alice")))
            .unwrap();
        assert_eq!(hits, Some(vec![a.id]));

        let fresh = engine.create_node(vec![], PropertyMap::new()).unwrap();
        assert!(fresh.id.as_u64() > deleted.id.as_u64());
    }

    #[test]
    fn test_value_types_survive_encoding() {
        let (_dir, engine) = open();
        let props = conformance::props(&[
            ("i", PropertyValue::Integer(i64::MAX)),
            ("f", PropertyValue::Float(1.0)),
            ("s", "text".into()),
            ("b", false.into()),
            ("l", PropertyValue::List(vec![1.5.into(), 2.5.into()])),
        ]);
        let node = engine.create_node(vec![], props.clone()).unwrap();
        assert_eq!(engine.get_node(node.id).unwrap().properties, props);
    }
}
