//! Property graph data model
//!
//! - Nodes with an ordered label set and properties
//! - Directed, typed relationships with properties
//! - Change descriptions that storage engines apply atomically

pub mod change;
pub mod edge;
pub mod node;
pub mod property;
pub mod types;

pub use change::{apply_edge_changes, apply_node_changes, ChangeSummary, NodeChange, PropertyChange};
pub use edge::Edge;
pub use node::Node;
pub use property::{PropertyMap, PropertyValue};
pub use types::{Direction, EdgeId, EdgeType, Label, NodeId};

use thiserror::Error;

/// Data model violations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Collections containing collections can not be stored in properties")]
    NestedList,

    #[error("Collections containing mixed types can not be stored in properties")]
    MixedList,

    #[error("Property values can only be of primitive types or arrays thereof, got {0}")]
    UnsupportedType(&'static str),
}

pub type GraphResult<T> = Result<T, GraphError>;
