//! Aggregate functions
//!
//! One [`Accumulator`] per (group, aggregate). Nulls are skipped by every
//! aggregate except `count(*)`, which counts rows.

use super::expr::Expr;
use super::{Equivalent, ExecutionError, ExecutionResult, Value};
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    CountStar,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            "collect" => Some(AggregateFunction::Collect),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregateFunction::Count | AggregateFunction::CountStar => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Collect => "collect",
        })
    }
}

/// One aggregate in a projection, writing its result to `slot`
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub distinct: bool,
    /// `None` only for `count(*)`
    pub argument: Option<Expr>,
    pub slot: usize,
}

#[derive(Debug, Clone)]
enum Sum {
    Integer(i64),
    Float(f64),
}

#[derive(Debug)]
enum State {
    Count(i64),
    Sum(Sum),
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
}

#[derive(Debug)]
pub struct Accumulator {
    state: State,
    counts_rows: bool,
    seen: Option<FxHashSet<Equivalent>>,
}

impl Accumulator {
    pub fn new(spec: &AggregateSpec) -> Self {
        let state = match spec.function {
            AggregateFunction::Count | AggregateFunction::CountStar => State::Count(0),
            AggregateFunction::Sum => State::Sum(Sum::Integer(0)),
            AggregateFunction::Avg => State::Avg { total: 0.0, count: 0 },
            AggregateFunction::Min => State::Min(None),
            AggregateFunction::Max => State::Max(None),
            AggregateFunction::Collect => State::Collect(Vec::new()),
        };
        Self {
            state,
            counts_rows: spec.function == AggregateFunction::CountStar,
            seen: spec.distinct.then(FxHashSet::default),
        }
    }

    /// Feeds one row's argument value (ignored for `count(*)`)
    pub fn update(&mut self, value: Value) -> ExecutionResult<()> {
        if self.counts_rows {
            if let State::Count(n) = &mut self.state {
                *n += 1;
            }
            return Ok(());
        }
        if value.is_null() {
            return Ok(());
        }
        if let Some(seen) = &mut self.seen {
            if !seen.insert(Equivalent(value.clone())) {
                return Ok(());
            }
        }
        match &mut self.state {
            State::Count(n) => *n += 1,
            State::Sum(sum) => {
                *sum = match (&*sum, &value) {
                    (Sum::Integer(acc), Value::Integer(i)) => Sum::Integer(
                        acc.checked_add(*i)
                            .ok_or_else(|| ExecutionError::Arithmetic("integer overflow".to_string()))?,
                    ),
                    (Sum::Integer(acc), Value::Float(f)) => Sum::Float(*acc as f64 + f),
                    (Sum::Float(acc), Value::Integer(i)) => Sum::Float(acc + *i as f64),
                    (Sum::Float(acc), Value::Float(f)) => Sum::Float(acc + f),
                    (_, other) => {
                        return Err(ExecutionError::TypeError(format!(
                            "sum() expects numeric values, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
            State::Avg { total, count } => match value.as_number() {
                Some(x) => {
                    *total += x;
                    *count += 1;
                }
                None => {
                    return Err(ExecutionError::TypeError(format!(
                        "avg() expects numeric values, got {}",
                        value.type_name()
                    )))
                }
            },
            State::Min(current) => {
                if current.as_ref().map_or(true, |c| value.order_cmp(c) == Ordering::Less) {
                    *current = Some(value);
                }
            }
            State::Max(current) => {
                if current.as_ref().map_or(true, |c| value.order_cmp(c) == Ordering::Greater) {
                    *current = Some(value);
                }
            }
            State::Collect(items) => items.push(value),
        }
        Ok(())
    }

    pub fn finish(self) -> Value {
        match self.state {
            State::Count(n) => Value::Integer(n),
            State::Sum(Sum::Integer(i)) => Value::Integer(i),
            State::Sum(Sum::Float(f)) => Value::Float(f),
            State::Avg { count: 0, .. } => Value::Null,
            State::Avg { total, count } => Value::Float(total / count as f64),
            State::Min(v) | State::Max(v) => v.unwrap_or(Value::Null),
            State::Collect(items) => Value::List(items),
        }
    }
}
