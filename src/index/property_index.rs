//! B-Tree property index over one (label, property) pair
//!
//! Keys are normalized so that integers and floats share one numeric
//! domain: `1` and `1.0` land on the same key. Lookups may therefore
//! return a superset of the exact matches; callers re-check the predicate.

use crate::graph::{NodeId, PropertyValue};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Totally ordered index key derived from a property value
#[derive(Debug, Clone)]
pub enum IndexKey {
    Boolean(bool),
    Number(f64),
    String(String),
    List(Vec<IndexKey>),
}

impl IndexKey {
    fn rank(&self) -> u8 {
        match self {
            IndexKey::Boolean(_) => 0,
            IndexKey::Number(_) => 1,
            IndexKey::String(_) => 2,
            IndexKey::List(_) => 3,
        }
    }

    fn number(x: f64) -> Self {
        if x == 0.0 {
            IndexKey::Number(0.0)
        } else if x.is_nan() {
            IndexKey::Number(f64::NAN)
        } else {
            IndexKey::Number(x)
        }
    }
}

impl From<&PropertyValue> for IndexKey {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Boolean(b) => IndexKey::Boolean(*b),
            PropertyValue::Integer(i) => IndexKey::number(*i as f64),
            PropertyValue::Float(f) => IndexKey::number(*f),
            PropertyValue::String(s) => IndexKey::String(s.clone()),
            PropertyValue::List(items) => IndexKey::List(items.iter().map(IndexKey::from).collect()),
        }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Boolean(a), IndexKey::Boolean(b)) => a.cmp(b),
            (IndexKey::Number(a), IndexKey::Number(b)) => a.total_cmp(b),
            (IndexKey::String(a), IndexKey::String(b)) => a.cmp(b),
            (IndexKey::List(a), IndexKey::List(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

/// Predicate an index can answer
#[derive(Debug, Clone, PartialEq)]
pub enum IndexPredicate {
    Equals(PropertyValue),
    Range {
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
    },
}

/// Index for a specific property on a specific label
#[derive(Debug, Clone, Default)]
pub struct PropertyIndex {
    index: BTreeMap<IndexKey, BTreeSet<NodeId>>,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: &PropertyValue, node_id: NodeId) {
        self.index.entry(IndexKey::from(value)).or_default().insert(node_id);
    }

    pub fn remove(&mut self, value: &PropertyValue, node_id: NodeId) {
        let key = IndexKey::from(value);
        if let Some(nodes) = self.index.get_mut(&key) {
            nodes.remove(&node_id);
            if nodes.is_empty() {
                self.index.remove(&key);
            }
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, value: &PropertyValue) -> Vec<NodeId> {
        self.index
            .get(&IndexKey::from(value))
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes whose key falls in the range. Bounds are widened to inclusive
    /// and the scan stays within the type domain of the bounds.
    pub fn range(&self, lower: &Bound<PropertyValue>, upper: &Bound<PropertyValue>) -> Vec<NodeId> {
        let lower_key = bound_key(lower);
        let upper_key = bound_key(upper);
        let rank = match (&lower_key, &upper_key) {
            (Some(l), Some(u)) if l.rank() != u.rank() => return Vec::new(),
            (Some(l), Some(u)) if l > u => return Vec::new(),
            (Some(k), _) | (None, Some(k)) => k.rank(),
            (None, None) => return self.index.values().flatten().copied().collect(),
        };

        let lower_bound = lower_key.map_or(Bound::Unbounded, Bound::Included);
        let upper_bound = upper_key.map_or(Bound::Unbounded, Bound::Included);

        self.index
            .range((lower_bound, upper_bound))
            .skip_while(|(k, _)| k.rank() < rank)
            .take_while(|(k, _)| k.rank() == rank)
            .flat_map(|(_, nodes)| nodes.iter().copied())
            .collect()
    }

    pub fn lookup(&self, predicate: &IndexPredicate) -> Vec<NodeId> {
        match predicate {
            IndexPredicate::Equals(value) => self.get(value),
            IndexPredicate::Range { lower, upper } => self.range(lower, upper),
        }
    }
}

fn bound_key(bound: &Bound<PropertyValue>) -> Option<IndexKey> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => Some(IndexKey::from(v)),
        Bound::Unbounded => None,
    }
}
