//! Property indexing
//!
//! B-Tree indices mapping (label, property, value) to node sets.

pub mod manager;
pub mod property_index;

pub use manager::{IndexManager, PropertyIndexKey};
pub use property_index::{IndexKey, IndexPredicate, PropertyIndex};
