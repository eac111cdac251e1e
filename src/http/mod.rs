//! HTTP adapter speaking the Neo4j transactional JSON API
//!
//! The core engine is synchronous; handlers hand each statement to a
//! blocking worker and answer with the shapes in [`crate::compat`].

mod handler;
mod server;

pub use handler::QueryRequest;
pub use server::{router, HttpServer};
