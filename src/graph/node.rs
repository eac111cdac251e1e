//! Node of the property graph

use super::property::{PropertyMap, PropertyValue};
use super::types::{Label, NodeId};
use serde::{Deserialize, Serialize};

/// A node: identity, an insertion-ordered label set, and properties.
///
/// Equality is by identity only, so two snapshots of the same node taken
/// before and after an update compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Labels in insertion order, without duplicates
    labels: Vec<Label>,
    pub properties: PropertyMap,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Node {
            id,
            labels: Vec::new(),
            properties: PropertyMap::new(),
        }
    }

    /// Builds a node, dropping repeated labels while keeping first-seen order
    pub fn with_labels_and_properties(
        id: NodeId,
        labels: impl IntoIterator<Item = Label>,
        properties: PropertyMap,
    ) -> Self {
        let mut node = Node {
            id,
            labels: Vec::new(),
            properties,
        };
        for label in labels {
            node.add_label(label);
        }
        node
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Returns true if the label was not present
    pub fn add_label(&mut self, label: impl Into<Label>) -> bool {
        let label = label.into();
        if self.labels.contains(&label) {
            return false;
        }
        self.labels.push(label);
        true
    }

    /// Returns true if the label was present
    pub fn remove_label(&mut self, label: &Label) -> bool {
        let before = self.labels.len();
        self.labels.retain(|l| l != label);
        self.labels.len() != before
    }

    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.remove(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}
