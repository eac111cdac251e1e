//! Parse and result caches
//!
//! Both are bounded LRUs; a capacity of 0 disables a cache. A cached
//! result is served only while it is younger than the TTL and was taken
//! at the storage generation current at lookup, so any write invalidates
//! every result computed before it.

use super::ast::Statement;
use super::executor::{Params, Value};
use super::ResultSet;
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self, size: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
        }
    }
}

fn new_lru<K: std::hash::Hash + Eq, V>(capacity: usize) -> Option<Mutex<LruCache<K, V>>> {
    NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c)))
}

/// Query text to parsed statement
pub struct ParseCache {
    entries: Option<Mutex<LruCache<String, Arc<Statement>>>>,
    counters: Counters,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: new_lru(capacity),
            counters: Counters::default(),
        }
    }

    pub fn get(&self, query: &str) -> Option<Arc<Statement>> {
        let entries = self.entries.as_ref()?;
        let found = entries.lock().ok()?.get(query).cloned();
        self.counters.record(found.is_some());
        found
    }

    pub fn insert(&self, query: &str, statement: Arc<Statement>) {
        if let Some(Ok(mut entries)) = self.entries.as_ref().map(|e| e.lock()) {
            entries.put(query.to_string(), statement);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let size = self
            .entries
            .as_ref()
            .and_then(|e| e.lock().ok().map(|e| e.len()))
            .unwrap_or(0);
        self.counters.stats(size)
    }

    pub fn clear(&self) {
        if let Some(Ok(mut entries)) = self.entries.as_ref().map(|e| e.lock()) {
            entries.clear();
        }
    }
}

/// Query text plus parameters in name order
type ResultKey = (String, Vec<(String, Value)>);

struct CachedResult {
    result: Arc<ResultSet>,
    generation: u64,
    stored_at: Instant,
}

/// Results of read-only statements
pub struct ResultCache {
    entries: Option<Mutex<LruCache<ResultKey, CachedResult>>>,
    ttl: Duration,
    counters: Counters,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: new_lru(capacity),
            ttl,
            counters: Counters::default(),
        }
    }

    fn key(query: &str, params: &Params) -> ResultKey {
        (
            query.to_string(),
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )
    }

    pub fn get(&self, query: &str, params: &Params, generation: u64) -> Option<Arc<ResultSet>> {
        let entries = self.entries.as_ref()?;
        let key = Self::key(query, params);
        let mut entries = entries.lock().ok()?;
        let lookup = entries.get(&key).map(|entry| {
            let valid = entry.generation == generation && entry.stored_at.elapsed() < self.ttl;
            (valid, Arc::clone(&entry.result))
        });
        let found = match lookup {
            Some((true, result)) => Some(result),
            Some((false, _)) => {
                entries.pop(&key);
                None
            }
            None => None,
        };
        self.counters.record(found.is_some());
        found
    }

    pub fn insert(&self, query: &str, params: &Params, generation: u64, result: Arc<ResultSet>) {
        if let Some(Ok(mut entries)) = self.entries.as_ref().map(|e| e.lock()) {
            entries.put(
                Self::key(query, params),
                CachedResult {
                    result,
                    generation,
                    stored_at: Instant::now(),
                },
            );
        }
    }

    pub fn stats(&self) -> CacheStats {
        let size = self
            .entries
            .as_ref()
            .and_then(|e| e.lock().ok().map(|e| e.len()))
            .unwrap_or(0);
        self.counters.stats(size)
    }

    pub fn clear(&self) {
        if let Some(Ok(mut entries)) = self.entries.as_ref().map(|e| e.lock()) {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Query;

    fn result(n: i64) -> Arc<ResultSet> {
        Arc::new(ResultSet {
            columns: vec!["n".into()],
            rows: vec![vec![Value::Integer(n)]],
            ..ResultSet::default()
        })
    }

    #[test]
    fn test_parse_cache_lru() {
        let cache = ParseCache::new(1);
        let statement = Arc::new(Statement::Query(Query::default()));
        cache.insert("a", statement.clone());
        assert!(cache.get("a").is_some());
        cache.insert("b", statement);
        assert!(cache.get("a").is_none());
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                size: 1
            }
        );
    }

    #[test]
    fn test_result_cache_respects_generation_and_params() {
        let cache = ResultCache::new(8, Duration::from_secs(60));
        let mut params = Params::new();
        params.insert("x".into(), Value::Integer(1));
        cache.insert("q", &params, 3, result(1));

        assert_eq!(cache.get("q", &params, 3).unwrap().rows[0][0], Value::Integer(1));
        assert!(cache.get("q", &Params::new(), 3).is_none());
        assert!(cache.get("q", &params, 4).is_none());
        // The stale entry was evicted
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_result_cache_ttl_and_disable() {
        let cache = ResultCache::new(8, Duration::ZERO);
        cache.insert("q", &Params::new(), 0, result(1));
        assert!(cache.get("q", &Params::new(), 0).is_none());

        let disabled = ResultCache::new(0, Duration::from_secs(60));
        disabled.insert("q", &Params::new(), 0, result(1));
        assert!(disabled.get("q", &Params::new(), 0).is_none());
        assert_eq!(disabled.stats(), CacheStats::default());
    }
}
