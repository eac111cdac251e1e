//! Registry of property indexes
//!
//! The manager carries no locks of its own: each storage engine keeps it
//! behind the same lock that guards node data, so an index is updated in
//! the same critical section as the node write that triggers it.

use super::property_index::{IndexPredicate, PropertyIndex};
use crate::graph::{Label, Node, NodeId};
use std::collections::HashMap;

/// Key for identifying a property index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyIndexKey {
    pub label: Label,
    pub property: String,
}

impl PropertyIndexKey {
    pub fn new(label: Label, property: impl Into<String>) -> Self {
        Self {
            label,
            property: property.into(),
        }
    }
}

/// All property indexes of one graph
#[derive(Debug, Default)]
pub struct IndexManager {
    indices: HashMap<PropertyIndexKey, PropertyIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index and backfills it from `nodes`.
    /// Returns false if the index already existed.
    pub fn create_index<'a>(
        &mut self,
        key: PropertyIndexKey,
        nodes: impl IntoIterator<Item = &'a Node>,
    ) -> bool {
        if self.indices.contains_key(&key) {
            return false;
        }
        let mut index = PropertyIndex::new();
        for node in nodes {
            if node.has_label(&key.label) {
                if let Some(value) = node.get_property(&key.property) {
                    index.insert(value, node.id);
                }
            }
        }
        self.indices.insert(key, index);
        true
    }

    /// Returns false if there was no such index
    pub fn drop_index(&mut self, key: &PropertyIndexKey) -> bool {
        self.indices.remove(key).is_some()
    }

    pub fn has_index(&self, label: &Label, property: &str) -> bool {
        self.indices.contains_key(&PropertyIndexKey::new(label.clone(), property))
    }

    /// Index definitions, sorted
    pub fn definitions(&self) -> Vec<PropertyIndexKey> {
        let mut keys: Vec<_> = self.indices.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Adds every indexed (label, property) entry of `node`
    pub fn insert_node(&mut self, node: &Node) {
        if self.indices.is_empty() {
            return;
        }
        for (key, index) in self.indices.iter_mut() {
            if node.has_label(&key.label) {
                if let Some(value) = node.get_property(&key.property) {
                    index.insert(value, node.id);
                }
            }
        }
    }

    /// Removes every indexed (label, property) entry of `node`
    pub fn remove_node(&mut self, node: &Node) {
        if self.indices.is_empty() {
            return;
        }
        for (key, index) in self.indices.iter_mut() {
            if node.has_label(&key.label) {
                if let Some(value) = node.get_property(&key.property) {
                    index.remove(value, node.id);
                }
            }
        }
    }

    /// Moves `old`'s entries to `new`'s
    pub fn replace_node(&mut self, old: &Node, new: &Node) {
        self.remove_node(old);
        self.insert_node(new);
    }

    /// Candidate nodes for `predicate`, or None when no index covers the pair
    pub fn lookup(&self, label: &Label, property: &str, predicate: &IndexPredicate) -> Option<Vec<NodeId>> {
        self.indices
            .get(&PropertyIndexKey::new(label.clone(), property))
            .map(|index| index.lookup(predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PropertyMap, PropertyValue};

    fn person(id: u64, age: i64) -> Node {
        let mut props = PropertyMap::new();
        props.insert("age".to_string(), PropertyValue::Integer(age));
        Node::with_labels_and_properties(NodeId::new(id), vec![Label::new("Person")], props)
    }

    #[test]
    fn test_create_backfills_and_is_idempotent() {
        let nodes = vec![person(1, 30), person(2, 40)];
        let mut manager = IndexManager::new();
        let key = PropertyIndexKey::new(Label::new("Person"), "age");

        assert!(manager.create_index(key.clone(), nodes.iter()));
        assert!(!manager.create_index(key.clone(), nodes.iter()));

        let found = manager
            .lookup(&Label::new("Person"), "age", &IndexPredicate::Equals(PropertyValue::Integer(40)))
            .unwrap();
        assert_eq!(found, vec![NodeId::new(2)]);

        assert!(manager.drop_index(&key));
        assert!(!manager.drop_index(&key));
        assert!(manager
            .lookup(&Label::new("Person"), "age", &IndexPredicate::Equals(PropertyValue::Integer(40)))
            .is_none());
    }

    #[test]
    fn test_replace_node_moves_entries() {
        let mut manager = IndexManager::new();
        manager.create_index(PropertyIndexKey::new(Label::new("Person"), "age"), std::iter::empty());

        let old = person(1, 30);
        manager.insert_node(&old);
        let new = person(1, 31);
        manager.replace_node(&old, &new);

        let eq = |v| IndexPredicate::Equals(PropertyValue::Integer(v));
        assert!(manager.lookup(&Label::new("Person"), "age", &eq(30)).unwrap().is_empty());
        assert_eq!(manager.lookup(&Label::new("Person"), "age", &eq(31)).unwrap(), vec![NodeId::new(1)]);
    }

    #[test]
    fn test_unlabelled_nodes_are_not_indexed() {
        let mut manager = IndexManager::new();
        manager.create_index(PropertyIndexKey::new(Label::new("Person"), "age"), std::iter::empty());
        let mut node = Node::new(NodeId::new(5));
        node.set_property("age", 30i64);
        manager.insert_node(&node);
        let found = manager
            .lookup(&Label::new("Person"), "age", &IndexPredicate::Equals(PropertyValue::Integer(30)))
            .unwrap();
        assert!(found.is_empty());
    }
}
