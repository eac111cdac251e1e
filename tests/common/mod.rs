//! Shared fixtures for the integration tests
#![allow(dead_code)]

use graphcore::{EngineConfig, MemoryEngine, Params, QueryEngine, ResultSet, RocksEngine, Value};
use std::sync::Arc;
use tempfile::TempDir;

/// An engine plus the directory backing it, if any
pub struct Fixture {
    pub engine: QueryEngine,
    pub name: &'static str,
    _dir: Option<TempDir>,
}

impl Fixture {
    pub fn memory() -> Self {
        Self {
            engine: QueryEngine::new(Arc::new(MemoryEngine::new()), EngineConfig::default()),
            name: "memory",
            _dir: None,
        }
    }

    pub fn rocks() -> Self {
        let dir = TempDir::new().unwrap();
        let storage = RocksEngine::open(dir.path()).unwrap();
        Self {
            engine: QueryEngine::new(Arc::new(storage), EngineConfig::default()),
            name: "rocksdb",
            _dir: Some(dir),
        }
    }

    pub fn run(&self, query: &str) -> Arc<ResultSet> {
        self.run_with(query, &Params::new())
    }

    pub fn run_with(&self, query: &str, params: &Params) -> Arc<ResultSet> {
        self.engine
            .execute(query, params)
            .unwrap_or_else(|e| panic!("[{}] {} failed: {}", self.name, query, e))
    }
}

/// Both backends, so every scenario runs against each
pub fn fixtures() -> Vec<Fixture> {
    vec![Fixture::memory(), Fixture::rocks()]
}

pub fn params(pairs: &[(&str, Value)]) -> Params {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn strings(values: &[&str]) -> Value {
    Value::List(values.iter().map(|s| Value::from(*s)).collect())
}
