//! Query execution engine using the Volcano iterator model
//!
//! The planner turns an AST into a tree of [`LogicalOp`]s. At run time that
//! tree is instantiated into physical operators, each pulling
//! [`Record`]s from its input one at a time. Blocking operators (sort,
//! aggregation, delete) drain their input on the first pull.

pub mod aggregate;
pub mod expr;
pub mod functions;
pub mod operator;
pub mod planner;
pub mod record;
pub mod value;
pub mod write;

pub use operator::{build, OperatorBox, PhysicalOperator};
pub use planner::{LogicalOp, LogicalPlan, PlanError, PlanResult, QueryPlanner};
pub use record::Record;
pub use value::{Equivalent, Value};

use crate::graph::GraphError;
use crate::storage::{StorageError, StorageEngine};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Query parameters by name, without the `$`
pub type Params = BTreeMap<String, Value>;

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Type mismatch: {0}")]
    TypeError(String),

    #[error(transparent)]
    InvalidProperty(#[from] GraphError),

    #[error("{0}")]
    Arithmetic(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Runtime(String),

    #[error("The transaction has been terminated")]
    Cancelled,

    #[error("The transaction has not completed within the specified timeout")]
    Timeout,
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Cooperative cancellation and deadline for one query.
///
/// Clones share the cancelled flag, so a handle kept by the caller can stop
/// a query running on another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails once the token is cancelled or its deadline has passed
    pub fn check(&self) -> ExecutionResult<()> {
        if self.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ExecutionError::Timeout),
            _ => Ok(()),
        }
    }
}

/// Update counters reported with every result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub nodes_created: usize,
    pub nodes_deleted: usize,
    pub relationships_created: usize,
    pub relationships_deleted: usize,
    pub properties_set: usize,
    pub labels_added: usize,
    pub labels_removed: usize,
    pub indexes_added: usize,
    pub indexes_removed: usize,
}

impl QueryStats {
    pub fn contains_updates(&self) -> bool {
        *self != QueryStats::default()
    }
}

/// Everything an operator needs besides its input
pub struct ExecutionContext<'a> {
    pub storage: &'a dyn StorageEngine,
    pub token: &'a CancellationToken,
    /// Serializes MERGE match-or-create across concurrent queries
    pub merge_lock: &'a Mutex<()>,
    /// Database name used in element IDs
    pub database: &'a str,
    pub stats: QueryStats,
}

/// Runs a plan to completion and returns its output rows
pub fn execute_plan(plan: &LogicalPlan, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Vec<Vec<Value>>> {
    ctx.token.check()?;
    let mut root = build(&plan.root, Record::new(plan.width));
    let mut rows = Vec::new();
    while let Some(record) = root.next(ctx)? {
        ctx.token.check()?;
        if !plan.output.is_empty() {
            rows.push(record.project(&plan.output));
        }
    }
    Ok(rows)
}
