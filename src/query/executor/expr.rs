//! Compiled expressions
//!
//! The planner lowers AST expressions into [`Expr`]: variables become slot
//! reads, parameters become constants and constant regexes are compiled
//! once. Evaluation follows Cypher's three-valued logic, with `null`
//! standing for "unknown".

use super::functions::ScalarFunction;
use super::{ExecutionContext, ExecutionError, ExecutionResult, Record, Value};
use crate::graph::Label;
use crate::query::ast::{BinaryOp, UnaryOp};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Expr {
    Constant(Value),
    Slot(usize),
    Property(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    HasLabels(Box<Expr>, Vec<Label>),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    /// `=~` against a pattern known at plan time
    Regex(Box<Expr>, Arc<Regex>),
    Function(ScalarFunction, Vec<Expr>),
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
}

/// Compiles a Cypher regex; `=~` must match the whole string
pub fn compile_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

impl Expr {
    pub fn eval(&self, record: &Record, ctx: &ExecutionContext<'_>) -> ExecutionResult<Value> {
        match self {
            Expr::Constant(v) => Ok(v.clone()),
            Expr::Slot(slot) => Ok(record.get(*slot).clone()),
            Expr::Property(expr, key) => property(&expr.eval(record, ctx)?, key),
            Expr::Index(expr, index) => subscript(expr.eval(record, ctx)?, index.eval(record, ctx)?),
            Expr::HasLabels(expr, labels) => match expr.eval(record, ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Node(n) => Ok(Value::Boolean(labels.iter().all(|l| n.has_label(l)))),
                other => Err(type_mismatch("Node", &other)),
            },
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| e.eval(record, ctx)).collect::<ExecutionResult<_>>()?,
            )),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (k, e) in entries {
                    map.insert(k.clone(), e.eval(record, ctx)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Binary(left, op, right) => match op {
                BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => logical(left, *op, right, record, ctx),
                _ => binary(&left.eval(record, ctx)?, *op, &right.eval(record, ctx)?),
            },
            Expr::Unary(op, expr) => unary(*op, expr.eval(record, ctx)?),
            Expr::Regex(expr, regex) => match expr.eval(record, ctx)? {
                Value::String(s) => Ok(Value::Boolean(regex.is_match(&s))),
                _ => Ok(Value::Null),
            },
            Expr::Function(function, args) => {
                let args = args.iter().map(|e| e.eval(record, ctx)).collect::<ExecutionResult<Vec<_>>>()?;
                function.call(args, ctx)
            }
            Expr::Case {
                operand,
                branches,
                otherwise,
            } => {
                let operand = operand.as_ref().map(|e| e.eval(record, ctx)).transpose()?;
                for (when, then) in branches {
                    let when = when.eval(record, ctx)?;
                    let hit = match &operand {
                        Some(value) => value.cypher_eq(&when) == Some(true),
                        None => matches!(when, Value::Boolean(true)),
                    };
                    if hit {
                        return then.eval(record, ctx);
                    }
                }
                match otherwise {
                    Some(e) => e.eval(record, ctx),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    /// Evaluates a predicate: only `true` passes, `false` and `null` reject
    pub fn is_true(&self, record: &Record, ctx: &ExecutionContext<'_>) -> ExecutionResult<bool> {
        match self.eval(record, ctx)? {
            Value::Boolean(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(type_mismatch("Boolean", &other)),
        }
    }

    /// True if evaluation cannot depend on the current row
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Constant(_) => true,
            Expr::Slot(_) | Expr::Function(..) => false,
            Expr::Property(e, _) | Expr::HasLabels(e, _) | Expr::Unary(_, e) | Expr::Regex(e, _) => e.is_constant(),
            Expr::Index(a, b) | Expr::Binary(a, _, b) => a.is_constant() && b.is_constant(),
            Expr::List(items) => items.iter().all(Expr::is_constant),
            Expr::Map(entries) => entries.iter().all(|(_, e)| e.is_constant()),
            Expr::Case { .. } => false,
        }
    }
}

fn type_mismatch(expected: &str, got: &Value) -> ExecutionError {
    ExecutionError::TypeError(format!("expected {} but was {}", expected, got.type_name()))
}

fn property(target: &Value, key: &str) -> ExecutionResult<Value> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Node(n) => Ok(Value::from(n.get_property(key))),
        Value::Edge(e) => Ok(Value::from(e.get_property(key))),
        Value::Map(m) => Ok(m.get(key).cloned().unwrap_or(Value::Null)),
        other => Err(type_mismatch("a map, node or relationship", other)),
    }
}

fn subscript(target: Value, index: Value) -> ExecutionResult<Value> {
    match (target, index) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::List(items), Value::Integer(i)) => {
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            if i < 0 || i >= len {
                Ok(Value::Null)
            } else {
                Ok(items[i as usize].clone())
            }
        }
        (target @ (Value::Map(_) | Value::Node(_) | Value::Edge(_)), Value::String(key)) => property(&target, &key),
        (Value::List(_), other) => Err(type_mismatch("Integer", &other)),
        (other, _) => Err(type_mismatch("a list or map", &other)),
    }
}

fn truth(value: Value) -> ExecutionResult<Option<bool>> {
    match value {
        Value::Boolean(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(type_mismatch("Boolean", &other)),
    }
}

fn logical(left: &Expr, op: BinaryOp, right: &Expr, record: &Record, ctx: &ExecutionContext<'_>) -> ExecutionResult<Value> {
    let l = truth(left.eval(record, ctx)?)?;
    // Short-circuit only where the result is already decided
    match (op, l) {
        (BinaryOp::And, Some(false)) => return Ok(Value::Boolean(false)),
        (BinaryOp::Or, Some(true)) => return Ok(Value::Boolean(true)),
        _ => {}
    }
    let r = truth(right.eval(record, ctx)?)?;
    let result = match op {
        BinaryOp::And => match (l, r) {
            (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (l, r) {
            (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => match (l, r) {
            (Some(a), Some(b)) => Some(a != b),
            _ => None,
        },
    };
    Ok(Value::from(result))
}

fn overflow() -> ExecutionError {
    ExecutionError::Arithmetic("integer overflow".to_string())
}

fn arithmetic(l: &Value, op: BinaryOp, r: &Value) -> ExecutionResult<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
            BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
            BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
            BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                return Err(ExecutionError::Arithmetic("/ by zero".to_string()))
            }
            BinaryOp::Div => a.checked_div(b).ok_or_else(overflow)?,
            BinaryOp::Mod => a.checked_rem(b).ok_or_else(overflow)?,
            _ => return Ok(Value::Float((a as f64).powf(b as f64))),
        };
        return Ok(Value::Integer(result));
    }
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
            _ => a.powf(b),
        })),
        _ => Err(ExecutionError::TypeError(format!(
            "cannot apply arithmetic to {} and {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn add(l: &Value, r: &Value) -> ExecutionResult<Value> {
    match (l, r) {
        (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        (Value::List(a), item) => Ok(Value::List(a.iter().cloned().chain(std::iter::once(item.clone())).collect())),
        (item, Value::List(b)) => Ok(Value::List(std::iter::once(item.clone()).chain(b.iter().cloned()).collect())),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        (Value::String(a), b @ (Value::Integer(_) | Value::Float(_) | Value::Boolean(_))) => {
            Ok(Value::String(format!("{}{}", a, b)))
        }
        (a @ (Value::Integer(_) | Value::Float(_) | Value::Boolean(_)), Value::String(b)) => {
            Ok(Value::String(format!("{}{}", a, b)))
        }
        _ => arithmetic(l, BinaryOp::Add, r),
    }
}

/// Evaluates a non-logical binary operator on already evaluated operands
pub fn binary(l: &Value, op: BinaryOp, r: &Value) -> ExecutionResult<Value> {
    if op == BinaryOp::In {
        return membership(l, r);
    }
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match op {
        BinaryOp::Eq => Ok(Value::from(l.cypher_eq(r))),
        BinaryOp::Ne => Ok(Value::from(l.cypher_eq(r).map(|b| !b))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let result = l.cypher_cmp(r).map(|ord| match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            });
            Ok(Value::from(result))
        }
        BinaryOp::Add => add(l, r),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => arithmetic(l, op, r),
        BinaryOp::StartsWith | BinaryOp::EndsWith | BinaryOp::Contains => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(Value::Boolean(match op {
                BinaryOp::StartsWith => a.starts_with(b.as_str()),
                BinaryOp::EndsWith => a.ends_with(b.as_str()),
                _ => a.contains(b.as_str()),
            })),
            _ => Ok(Value::Null),
        },
        BinaryOp::RegexMatch => match (l, r) {
            (Value::String(s), Value::String(pattern)) => {
                let regex = compile_regex(pattern).map_err(|e| ExecutionError::InvalidArgument(e.to_string()))?;
                Ok(Value::Boolean(regex.is_match(s)))
            }
            _ => Ok(Value::Null),
        },
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::In => Err(ExecutionError::Runtime(format!(
            "operator {:?} evaluated out of place",
            op
        ))),
    }
}

fn membership(item: &Value, list: &Value) -> ExecutionResult<Value> {
    let items = match list {
        Value::Null => return Ok(Value::Null),
        Value::List(items) => items,
        other => return Err(type_mismatch("List", other)),
    };
    let mut unknown = false;
    for candidate in items {
        match item.cypher_eq(candidate) {
            Some(true) => return Ok(Value::Boolean(true)),
            None => unknown = true,
            Some(false) => {}
        }
    }
    Ok(if unknown { Value::Null } else { Value::Boolean(false) })
}

fn unary(op: UnaryOp, value: Value) -> ExecutionResult<Value> {
    match op {
        UnaryOp::IsNull => Ok(Value::Boolean(value.is_null())),
        UnaryOp::IsNotNull => Ok(Value::Boolean(!value.is_null())),
        UnaryOp::Not => Ok(Value::from(truth(value)?.map(|b| !b))),
        UnaryOp::Minus => match value {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => Ok(Value::Integer(i.checked_neg().ok_or_else(overflow)?)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(type_mismatch("a number", &other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::executor::{CancellationToken, QueryStats};
    use crate::storage::MemoryEngine;
    use std::sync::Mutex;

    fn eval(expr: &Expr, record: &Record) -> ExecutionResult<Value> {
        let storage = MemoryEngine::new();
        let token = CancellationToken::new();
        let merge_lock = Mutex::new(());
        let ctx = ExecutionContext {
            storage: &storage,
            token: &token,
            merge_lock: &merge_lock,
            database: "neo4j",
            stats: QueryStats::default(),
        };
        expr.eval(record, &ctx)
    }

    fn c(v: impl Into<Value>) -> Box<Expr> {
        Box::new(Expr::Constant(v.into()))
    }

    fn null() -> Box<Expr> {
        Box::new(Expr::Constant(Value::Null))
    }

    #[test]
    fn test_three_valued_logic() {
        let record = Record::new(0);
        let and = Expr::Binary(null(), BinaryOp::And, c(false));
        assert_eq!(eval(&and, &record).unwrap(), Value::Boolean(false));
        let and = Expr::Binary(null(), BinaryOp::And, c(true));
        assert_eq!(eval(&and, &record).unwrap(), Value::Null);
        let or = Expr::Binary(null(), BinaryOp::Or, c(true));
        assert_eq!(eval(&or, &record).unwrap(), Value::Boolean(true));
        let not = Expr::Unary(UnaryOp::Not, null());
        assert_eq!(eval(&not, &record).unwrap(), Value::Null);
        let xor = Expr::Binary(c(true), BinaryOp::Xor, c(false));
        assert_eq!(eval(&xor, &record).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_missing_property_is_unknown() {
        let mut record = Record::new(1);
        record.set(0, Value::node(crate::graph::Node::new(crate::graph::NodeId::new(1))));
        let pred = Expr::Binary(
            Box::new(Expr::Property(Box::new(Expr::Slot(0)), "age".into())),
            BinaryOp::Gt,
            c(30i64),
        );
        assert_eq!(eval(&pred, &record).unwrap(), Value::Null);
        let storage = MemoryEngine::new();
        let token = CancellationToken::new();
        let merge_lock = Mutex::new(());
        let ctx = ExecutionContext {
            storage: &storage,
            token: &token,
            merge_lock: &merge_lock,
            database: "neo4j",
            stats: QueryStats::default(),
        };
        assert!(!pred.is_true(&record, &ctx).unwrap());
    }

    #[test]
    fn test_arithmetic() {
        let record = Record::new(0);
        let e = |l: Value, op, r: Value| eval(&Expr::Binary(c(l), op, c(r)), &record);
        assert_eq!(e(7i64.into(), BinaryOp::Div, 2i64.into()).unwrap(), Value::Integer(3));
        assert_eq!(e(7i64.into(), BinaryOp::Div, 2.0.into()).unwrap(), Value::Float(3.5));
        assert_eq!(e(2i64.into(), BinaryOp::Pow, 3i64.into()).unwrap(), Value::Float(8.0));
        assert_eq!(e("a".into(), BinaryOp::Add, 1i64.into()).unwrap(), Value::from("a1"));
        assert!(matches!(
            e(1i64.into(), BinaryOp::Div, 0i64.into()),
            Err(ExecutionError::Arithmetic(_))
        ));
        assert!(matches!(
            e(i64::MAX.into(), BinaryOp::Add, 1i64.into()),
            Err(ExecutionError::Arithmetic(_))
        ));
        assert_eq!(
            e(vec![1i64].into(), BinaryOp::Add, 2i64.into()).unwrap(),
            Value::from(vec![1i64, 2])
        );
    }

    #[test]
    fn test_in_and_string_operators() {
        let record = Record::new(0);
        let list = Value::from(vec![Value::Integer(1), Value::Null]);
        assert_eq!(binary(&1i64.into(), BinaryOp::In, &list).unwrap(), Value::Boolean(true));
        assert_eq!(binary(&2i64.into(), BinaryOp::In, &list).unwrap(), Value::Null);
        assert_eq!(
            binary(&"hello".into(), BinaryOp::StartsWith, &"he".into()).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(binary(&1i64.into(), BinaryOp::Contains, &"1".into()).unwrap(), Value::Null);
        let regex = Expr::Regex(c("abc"), Arc::new(compile_regex("a.").unwrap()));
        assert_eq!(eval(&regex, &record).unwrap(), Value::Boolean(false));
        let regex = Expr::Regex(c("abc"), Arc::new(compile_regex("a.*").unwrap()));
        assert_eq!(eval(&regex, &record).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_case_and_subscript() {
        let record = Record::new(0);
        let case = Expr::Case {
            operand: Some(c(2i64)),
            branches: vec![(Expr::Constant(1i64.into()), Expr::Constant("one".into())), (
                Expr::Constant(2.0.into()),
                Expr::Constant("two".into()),
            )],
            otherwise: None,
        };
        assert_eq!(eval(&case, &record).unwrap(), Value::from("two"));
        let index = Expr::Index(c(vec![1i64, 2, 3]), c(-1i64));
        assert_eq!(eval(&index, &record).unwrap(), Value::Integer(3));
        let index = Expr::Index(c(vec![1i64]), c(5i64));
        assert_eq!(eval(&index, &record).unwrap(), Value::Null);
    }
}
