//! Cypher query processing
//!
//! Text goes through the pest parser into an AST, the planner compiles it
//! into a logical operator tree, and the executor pulls rows through that
//! tree against a [`StorageEngine`]. [`QueryEngine`] ties the stages
//! together and owns the parse and result caches.

pub mod ast;
pub mod cache;
pub mod executor;
pub mod parser;

pub use ast::{Query, Statement};
pub use cache::{CacheStats, ParseCache, ResultCache};
pub use executor::{
    CancellationToken, ExecutionError, ExecutionResult, LogicalPlan, Params, PlanError, QueryPlanner, QueryStats,
    Record, Value,
};
pub use parser::{parse_query_text, parse_statement, ParseError, ParseResult};

use crate::config::{EngineConfig, StorageConfig};
use crate::graph::Label;
use crate::storage::{MemoryEngine, RocksEngine, StorageEngine, StorageError, StorageErrorKind};
use executor::{execute_plan, ExecutionContext};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Tabular result of one statement
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub stats: QueryStats,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }
}

/// Coarse failure class of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Semantic,
    ConstraintViolation,
    NotFound,
    Storage,
    Runtime,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execution(ExecutionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ExecutionError> for QueryError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Storage(e) => QueryError::Storage(e),
            other => QueryError::Execution(other),
        }
    }
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Parse(_) => ErrorKind::Syntax,
            QueryError::Plan(_) => ErrorKind::Semantic,
            QueryError::Storage(e) => match e.kind() {
                StorageErrorKind::NotFound => ErrorKind::NotFound,
                StorageErrorKind::ConstraintViolation => ErrorKind::ConstraintViolation,
                StorageErrorKind::InvalidArgument => ErrorKind::Runtime,
                StorageErrorKind::Backend => ErrorKind::Storage,
            },
            QueryError::Execution(ExecutionError::Cancelled | ExecutionError::Timeout) => ErrorKind::Cancelled,
            QueryError::Execution(_) => ErrorKind::Runtime,
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Query engine over one storage backend.
///
/// Safe to share between threads. Reads run concurrently. MERGE
/// match-or-create steps are serialized by an engine-wide lock.
pub struct QueryEngine {
    storage: Arc<dyn StorageEngine>,
    config: EngineConfig,
    merge_lock: Mutex<()>,
    parse_cache: ParseCache,
    result_cache: ResultCache,
}

impl QueryEngine {
    pub fn new(storage: Arc<dyn StorageEngine>, config: EngineConfig) -> Self {
        Self {
            parse_cache: ParseCache::new(config.parse_cache_capacity),
            result_cache: ResultCache::new(config.result_cache_capacity, config.result_cache_ttl()),
            storage,
            config,
            merge_lock: Mutex::new(()),
        }
    }

    /// Engine over an empty in-memory graph with default settings
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryEngine::new()), EngineConfig::default())
    }

    /// Opens the backend named by `config.storage`
    pub fn open(config: EngineConfig) -> QueryResult<Self> {
        let storage: Arc<dyn StorageEngine> = match &config.storage {
            StorageConfig::Memory => Arc::new(MemoryEngine::new()),
            StorageConfig::Rocksdb { path } => Arc::new(RocksEngine::open(path)?),
        };
        info!(
            "Query engine ready: backend={}, database={}, nodes={}",
            storage.name(),
            config.database,
            storage.node_count()?
        );
        Ok(Self::new(storage, config))
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Token carrying the configured default deadline, if any
    pub fn default_token(&self) -> CancellationToken {
        match self.config.query_timeout() {
            Some(timeout) => CancellationToken::with_timeout(timeout),
            None => CancellationToken::new(),
        }
    }

    pub fn execute(&self, query: &str, params: &Params) -> QueryResult<Arc<ResultSet>> {
        self.execute_with(query, params, &self.default_token())
    }

    /// Runs one statement under `token`
    pub fn execute_with(
        &self,
        query: &str,
        params: &Params,
        token: &CancellationToken,
    ) -> QueryResult<Arc<ResultSet>> {
        let started = Instant::now();
        let statement = self.parse(query)?;
        let result = match statement.as_ref() {
            Statement::Query(ast) => self.run_query(query, ast, params, token)?,
            Statement::Explain(ast) => {
                let plan = self.planner(params).plan(ast)?;
                Arc::new(ResultSet {
                    columns: vec!["operator".to_string(), "details".to_string()],
                    rows: plan
                        .explain()
                        .into_iter()
                        .map(|(op, details)| vec![Value::String(op), Value::String(details)])
                        .collect(),
                    stats: QueryStats::default(),
                })
            }
            Statement::CreateIndex { label, property } => {
                let mut stats = QueryStats::default();
                if self.create_index(label, property)? {
                    stats.indexes_added = 1;
                }
                Arc::new(ResultSet {
                    stats,
                    ..ResultSet::default()
                })
            }
            Statement::DropIndex { label, property } => {
                let mut stats = QueryStats::default();
                if self.drop_index(label, property)? {
                    stats.indexes_removed = 1;
                }
                Arc::new(ResultSet {
                    stats,
                    ..ResultSet::default()
                })
            }
        };
        debug!(
            "Executed in {:?}: {} rows, updates={}",
            started.elapsed(),
            result.rows.len(),
            result.stats.contains_updates()
        );
        Ok(result)
    }

    fn parse(&self, query: &str) -> QueryResult<Arc<Statement>> {
        if let Some(statement) = self.parse_cache.get(query) {
            return Ok(statement);
        }
        let statement = Arc::new(parse_statement(query)?);
        self.parse_cache.insert(query, Arc::clone(&statement));
        Ok(statement)
    }

    fn planner<'p>(&self, params: &'p Params) -> QueryPlanner<'p> {
        QueryPlanner::new(params, self.storage.indexes(), self.config.max_traversal_depth)
    }

    fn run_query(
        &self,
        text: &str,
        ast: &Query,
        params: &Params,
        token: &CancellationToken,
    ) -> QueryResult<Arc<ResultSet>> {
        token.check()?;
        let read_only = !ast.is_write();
        // Taken before execution so a concurrent write leaves the entry stale
        let generation = self.storage.generation();
        if read_only {
            if let Some(hit) = self.result_cache.get(text, params, generation) {
                debug!("Result cache hit");
                return Ok(hit);
            }
        }

        let plan = self.planner(params).plan(ast)?;
        let mut ctx = ExecutionContext {
            storage: self.storage.as_ref(),
            token,
            merge_lock: &self.merge_lock,
            database: &self.config.database,
            stats: QueryStats::default(),
        };
        let rows = execute_plan(&plan, &mut ctx)?;
        let result = Arc::new(ResultSet {
            columns: plan.columns,
            rows,
            stats: ctx.stats,
        });
        if read_only {
            self.result_cache.insert(text, params, generation, Arc::clone(&result));
        }
        Ok(result)
    }

    /// Logical plan for `query` without running it
    pub fn plan(&self, query: &str, params: &Params) -> QueryResult<LogicalPlan> {
        let ast = parse_query_text(query)?;
        Ok(self.planner(params).plan(&ast)?)
    }

    pub fn create_index(&self, label: &Label, property: &str) -> QueryResult<bool> {
        let created = self.storage.create_index(label, property)?;
        if created {
            // Cached results were computed with the old plans
            self.result_cache.clear();
            info!("Created index on :{}({})", label, property);
        }
        Ok(created)
    }

    pub fn drop_index(&self, label: &Label, property: &str) -> QueryResult<bool> {
        let dropped = self.storage.drop_index(label, property)?;
        if dropped {
            self.result_cache.clear();
            info!("Dropped index on :{}({})", label, property);
        }
        Ok(dropped)
    }

    /// Parse cache and result cache counters
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.parse_cache.stats(), self.result_cache.stats())
    }

    pub fn clear_caches(&self) {
        self.parse_cache.clear();
        self.result_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(engine: &QueryEngine, query: &str) -> Arc<ResultSet> {
        engine.execute(query, &Params::new()).unwrap()
    }

    #[test]
    fn test_filter_applies_before_aggregation() {
        let engine = QueryEngine::in_memory();
        run(
            &engine,
            "CREATE (:File {ext: '.ts', size: 10}), (:File {ext: '.ts', size: 20}), \
             (:File {ext: '.md', size: 5}), (:File {ext: '.ts', size: 1})",
        );
        let result = run(
            &engine,
            "MATCH (f:File) WHERE f.size > 2 RETURN f.ext AS ext, count(f) AS n ORDER BY n DESC",
        );
        assert_eq!(result.columns, vec!["ext", "n"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::from(".ts"), Value::Integer(2)],
                vec![Value::from(".md"), Value::Integer(1)],
            ]
        );
    }

    #[test]
    fn test_index_statements_report_stats() {
        let engine = QueryEngine::in_memory();
        let created = run(&engine, "CREATE INDEX ON :Person(name)");
        assert_eq!(created.stats.indexes_added, 1);
        assert_eq!(run(&engine, "CREATE INDEX ON :Person(name)").stats.indexes_added, 0);
        assert!(engine.storage().has_index(&Label::new("Person"), "name"));
        assert_eq!(run(&engine, "DROP INDEX ON :Person(name)").stats.indexes_removed, 1);
    }

    #[test]
    fn test_explain_does_not_execute() {
        let engine = QueryEngine::in_memory();
        let result = run(&engine, "EXPLAIN CREATE (:Person {name: 'x'})");
        assert_eq!(result.columns, vec!["operator", "details"]);
        assert_eq!(result.rows[0][0], Value::from("Create"));
        assert_eq!(engine.storage().node_count().unwrap(), 0);
    }

    #[test]
    fn test_result_cache_invalidated_by_write() {
        let engine = QueryEngine::in_memory();
        run(&engine, "CREATE (:N)");
        let count = "MATCH (n:N) RETURN count(n) AS c";
        assert_eq!(run(&engine, count).rows[0][0], Value::Integer(1));
        assert_eq!(run(&engine, count).rows[0][0], Value::Integer(1));
        assert_eq!(engine.cache_stats().1.hits, 1);

        run(&engine, "CREATE (:N)");
        assert_eq!(run(&engine, count).rows[0][0], Value::Integer(2));
        engine.clear_caches();
        assert_eq!(engine.cache_stats().1.size, 0);
    }

    #[test]
    fn test_cancelled_token_skips_cached_result() {
        let engine = QueryEngine::in_memory();
        run(&engine, "CREATE (:N)");
        let count = "MATCH (n:N) RETURN count(n) AS c";
        run(&engine, count);
        assert_eq!(engine.cache_stats().1.size, 1);

        let token = CancellationToken::new();
        token.cancel();
        let err = engine.execute_with(count, &Params::new(), &token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(engine.cache_stats().1.hits, 0);

        let expired = CancellationToken::with_timeout(std::time::Duration::ZERO);
        let err = engine.execute_with(count, &Params::new(), &expired).unwrap_err();
        assert!(matches!(err, QueryError::Execution(ExecutionError::Timeout)));
    }

    #[test]
    fn test_error_kinds() {
        let engine = QueryEngine::in_memory();
        let kind = |q: &str| engine.execute(q, &Params::new()).unwrap_err().kind();
        assert_eq!(kind("MATCH (n RETURN n"), ErrorKind::Syntax);
        assert_eq!(kind("MATCH (n) RETURN m"), ErrorKind::Semantic);
        assert_eq!(kind("RETURN $missing"), ErrorKind::Semantic);
        assert_eq!(kind("RETURN 1 / 0"), ErrorKind::Runtime);

        run(&engine, "CREATE (:A)-[:R]->(:B)");
        assert_eq!(kind("MATCH (a:A) DELETE a"), ErrorKind::ConstraintViolation);

        let token = CancellationToken::new();
        token.cancel();
        let err = engine.execute_with("MATCH (n) RETURN n", &Params::new(), &token).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
