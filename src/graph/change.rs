//! Atomic mutation descriptions applied by storage engines

use super::edge::Edge;
use super::node::Node;
use super::property::{PropertyMap, PropertyValue};
use super::types::Label;

/// A single property mutation
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    Set(String, PropertyValue),
    Remove(String),
    /// Remove every property not re-set by a later change in the same batch
    Clear,
}

/// A single node mutation
#[derive(Debug, Clone, PartialEq)]
pub enum NodeChange {
    Property(PropertyChange),
    AddLabel(Label),
    RemoveLabel(Label),
}

/// What an applied batch actually changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub properties_set: usize,
    pub labels_added: usize,
    pub labels_removed: usize,
}

fn apply_property(properties: &mut PropertyMap, change: &PropertyChange, summary: &mut ChangeSummary) {
    match change {
        PropertyChange::Set(key, value) => {
            properties.insert(key.clone(), value.clone());
            summary.properties_set += 1;
        }
        PropertyChange::Remove(key) => {
            if properties.remove(key).is_some() {
                summary.properties_set += 1;
            }
        }
        PropertyChange::Clear => {
            summary.properties_set += properties.len();
            properties.clear();
        }
    }
}

/// Applies changes in order to a copy of the node
pub fn apply_node_changes(node: &Node, changes: &[NodeChange]) -> (Node, ChangeSummary) {
    let mut updated = node.clone();
    let mut summary = ChangeSummary::default();
    for change in changes {
        match change {
            NodeChange::Property(p) => apply_property(&mut updated.properties, p, &mut summary),
            NodeChange::AddLabel(label) => {
                if updated.add_label(label.clone()) {
                    summary.labels_added += 1;
                }
            }
            NodeChange::RemoveLabel(label) => {
                if updated.remove_label(label) {
                    summary.labels_removed += 1;
                }
            }
        }
    }
    (updated, summary)
}

/// Applies property changes in order to a copy of the edge
pub fn apply_edge_changes(edge: &Edge, changes: &[PropertyChange]) -> (Edge, ChangeSummary) {
    let mut updated = edge.clone();
    let mut summary = ChangeSummary::default();
    for change in changes {
        apply_property(&mut updated.properties, change, &mut summary);
    }
    (updated, summary)
}
