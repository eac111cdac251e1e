//! Directed, typed relationship between two nodes

use super::property::{PropertyMap, PropertyValue};
use super::types::{Direction, EdgeId, EdgeType, NodeId};
use serde::{Deserialize, Serialize};

/// A relationship. Multiple relationships may connect the same pair of nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    pub properties: PropertyMap,
}

impl Edge {
    pub fn new(
        id: EdgeId,
        source: NodeId,
        target: NodeId,
        edge_type: impl Into<EdgeType>,
        properties: PropertyMap,
    ) -> Self {
        Edge {
            id,
            source,
            target,
            edge_type: edge_type.into(),
            properties,
        }
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

    /// The endpoint opposite to `node`, or None if `node` is not an endpoint.
    /// For a self-loop the node itself is returned.
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.source == node {
            Some(self.target)
        } else if self.target == node {
            Some(self.source)
        } else {
            None
        }
    }

    /// Whether the edge leaves `node` in the given direction
    pub fn touches(&self, node: NodeId, direction: Direction) -> bool {
        match direction {
            Direction::Outgoing => self.source == node,
            Direction::Incoming => self.target == node,
            Direction::Both => self.source == node || self.target == node,
        }
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Edge {}
