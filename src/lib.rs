//! Graphcore: a Cypher-compatible graph query engine
//!
//! # Architecture
//!
//! Query text flows through the pest-based parser into an AST, the planner
//! compiles it into a tree of logical operators with filters pushed down,
//! and the Volcano-style executor pulls rows through that tree against a
//! [`StorageEngine`]. Results and errors are mapped to the Neo4j wire
//! vocabulary by [`compat`] so existing drivers work unmodified.
//!
//! Two storage backends ship with the crate:
//! - [`MemoryEngine`]: transient, a single `RwLock` over the graph arena
//! - [`RocksEngine`]: durable, RocksDB column families plus in-memory indexes
//!
//! # Example
//!
//! ```
//! use graphcore::{Params, QueryEngine, Value};
//!
//! let engine = QueryEngine::in_memory();
//! engine.execute("CREATE (:Person {name: 'Ada'})", &Params::new()).unwrap();
//! let result = engine
//!     .execute("MATCH (p:Person) RETURN p.name AS name", &Params::new())
//!     .unwrap();
//! assert_eq!(result.rows, vec![vec![Value::from("Ada")]]);
//! ```

#![warn(clippy::all)]

pub mod compat;
pub mod config;
pub mod graph;
pub mod http;
pub mod index;
pub mod query;
pub mod storage;

pub use config::{Config, ConfigError, EngineConfig, ServerConfig, StorageConfig};
pub use graph::{
    Direction, Edge, EdgeId, EdgeType, GraphError, GraphResult, Label, Node, NodeId, PropertyMap, PropertyValue,
};
pub use query::{
    CancellationToken, ErrorKind, Params, QueryEngine, QueryError, QueryResult, QueryStats, ResultSet, Value,
};
pub use storage::{MemoryEngine, RocksEngine, StorageEngine, StorageError, StorageResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server version reported to Neo4j clients in the discovery document
pub const NEO4J_VERSION: &str = "5.0.0";

pub fn version() -> &'static str {
    VERSION
}
