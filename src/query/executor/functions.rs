//! Scalar functions
//!
//! Names resolve case-insensitively at plan time, so an unknown name or a
//! wrong argument count never reaches execution.

use super::{ExecutionContext, ExecutionError, ExecutionResult, Value};
use crate::compat::{edge_element_id, node_element_id};
use crate::graph::NodeId;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Id,
    ElementId,
    Labels,
    Type,
    Properties,
    Keys,
    Size,
    Length,
    Coalesce,
    ToUpper,
    ToLower,
    Trim,
    LTrim,
    RTrim,
    Replace,
    Substring,
    Split,
    ToString,
    ToInteger,
    ToFloat,
    ToBoolean,
    Head,
    Last,
    Tail,
    Range,
    Abs,
    Ceil,
    Floor,
    Round,
    Sqrt,
    Sign,
    StartNode,
    EndNode,
    Exists,
}

/// Aggregate function names, handled by the aggregation operator
pub const AGGREGATES: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];

pub fn is_aggregate(name: &str) -> bool {
    AGGREGATES.iter().any(|a| a.eq_ignore_ascii_case(name))
}

impl ScalarFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        use ScalarFunction::*;
        let f = match name.to_ascii_lowercase().as_str() {
            "id" => Id,
            "elementid" => ElementId,
            "labels" => Labels,
            "type" => Type,
            "properties" => Properties,
            "keys" => Keys,
            "size" => Size,
            "length" => Length,
            "coalesce" => Coalesce,
            "toupper" => ToUpper,
            "tolower" => ToLower,
            "trim" => Trim,
            "ltrim" => LTrim,
            "rtrim" => RTrim,
            "replace" => Replace,
            "substring" => Substring,
            "split" => Split,
            "tostring" => ToString,
            "tointeger" => ToInteger,
            "tofloat" => ToFloat,
            "toboolean" => ToBoolean,
            "head" => Head,
            "last" => Last,
            "tail" => Tail,
            "range" => Range,
            "abs" => Abs,
            "ceil" => Ceil,
            "floor" => Floor,
            "round" => Round,
            "sqrt" => Sqrt,
            "sign" => Sign,
            "startnode" => StartNode,
            "endnode" => EndNode,
            "exists" => Exists,
            _ => return None,
        };
        Some(f)
    }

    /// Accepted argument count range
    pub fn arity(self) -> (usize, usize) {
        use ScalarFunction::*;
        match self {
            Coalesce => (1, usize::MAX),
            Replace => (3, 3),
            Substring | Range => (2, 3),
            Split => (2, 2),
            _ => (1, 1),
        }
    }

    pub fn call(self, args: Vec<Value>, ctx: &ExecutionContext<'_>) -> ExecutionResult<Value> {
        use ScalarFunction::*;
        let (min, max) = self.arity();
        if args.len() < min || args.len() > max {
            return Err(ExecutionError::InvalidArgument(format!(
                "wrong number of arguments for function '{}()'",
                self
            )));
        }
        if self == Coalesce {
            return Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null));
        }
        if self == Exists {
            return Ok(Value::Boolean(args.first().is_some_and(|v| !v.is_null())));
        }
        let mut args = args.into_iter();
        let first = args.next().unwrap_or(Value::Null);
        // Every remaining function returns null for a null first argument
        if first.is_null() {
            return Ok(Value::Null);
        }
        let rest: Vec<Value> = args.collect();

        let result = match (self, &first) {
            (Id, Value::Node(n)) => Value::Integer(n.id.as_u64() as i64),
            (Id, Value::Edge(e)) => Value::Integer(e.id.as_u64() as i64),
            (ElementId, Value::Node(n)) => Value::String(node_element_id(ctx.database, n.id)),
            (ElementId, Value::Edge(e)) => Value::String(edge_element_id(ctx.database, e.id)),
            (Labels, Value::Node(n)) => Value::List(n.labels().iter().map(|l| Value::from(l.as_str())).collect()),
            (Type, Value::Edge(e)) => Value::from(e.edge_type.as_str()),
            (Properties, _) => match first.properties() {
                Some(map) => Value::Map(map),
                None => return Err(self.type_error(&first)),
            },
            (Keys, _) => match first.properties() {
                Some(map) => Value::List(map.into_keys().map(Value::String).collect()),
                None => return Err(self.type_error(&first)),
            },
            (Size | Length, Value::List(items)) => Value::Integer(items.len() as i64),
            (Size | Length, Value::String(s)) => Value::Integer(s.chars().count() as i64),
            (ToUpper, Value::String(s)) => Value::String(s.to_uppercase()),
            (ToLower, Value::String(s)) => Value::String(s.to_lowercase()),
            (Trim, Value::String(s)) => Value::from(s.trim()),
            (LTrim, Value::String(s)) => Value::from(s.trim_start()),
            (RTrim, Value::String(s)) => Value::from(s.trim_end()),
            (Replace, Value::String(s)) => match (&rest[0], &rest[1]) {
                (Value::String(from), Value::String(to)) => Value::String(s.replace(from.as_str(), to)),
                (Value::Null, _) | (_, Value::Null) => Value::Null,
                (other, _) => return Err(self.type_error(other)),
            },
            (Substring, Value::String(s)) => substring(s, &rest)?,
            (Split, Value::String(s)) => match &rest[0] {
                Value::String(delim) => Value::List(s.split(delim.as_str()).map(Value::from).collect()),
                Value::Null => Value::Null,
                other => return Err(self.type_error(other)),
            },
            (ToString, Value::String(_)) => first.clone(),
            (ToString, Value::Integer(_) | Value::Float(_) | Value::Boolean(_)) => Value::String(first.to_string()),
            (ToInteger, Value::Integer(_)) => first.clone(),
            (ToInteger, Value::Float(f)) => float_to_integer(*f),
            (ToInteger, Value::Boolean(b)) => Value::Integer(*b as i64),
            (ToInteger, Value::String(s)) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => Value::Integer(i),
                    Err(_) => s.parse::<f64>().map(float_to_integer).unwrap_or(Value::Null),
                }
            }
            (ToFloat, Value::Float(_)) => first.clone(),
            (ToFloat, Value::Integer(i)) => Value::Float(*i as f64),
            (ToFloat, Value::String(s)) => s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
            (ToBoolean, Value::Boolean(_)) => first.clone(),
            (ToBoolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => Value::Null,
            },
            (ToBoolean, Value::Integer(i)) => Value::Boolean(*i != 0),
            (Head, Value::List(items)) => items.first().cloned().unwrap_or(Value::Null),
            (Last, Value::List(items)) => items.last().cloned().unwrap_or(Value::Null),
            (Tail, Value::List(items)) => Value::List(items.iter().skip(1).cloned().collect()),
            (Range, Value::Integer(start)) => range(*start, &rest)?,
            (Abs, Value::Integer(i)) => Value::Integer(
                i.checked_abs()
                    .ok_or_else(|| ExecutionError::Arithmetic("integer overflow".to_string()))?,
            ),
            (Abs, Value::Float(f)) => Value::Float(f.abs()),
            (Ceil | Floor | Round | Sqrt, Value::Integer(_) | Value::Float(_)) => {
                let x = first.as_number().unwrap_or(f64::NAN);
                Value::Float(match self {
                    Ceil => x.ceil(),
                    Floor => x.floor(),
                    Round => (x + 0.5).floor(),
                    _ => x.sqrt(),
                })
            }
            (Sign, Value::Integer(i)) => Value::Integer(i.signum()),
            (Sign, Value::Float(f)) => Value::Integer(if *f > 0.0 {
                1
            } else if *f < 0.0 {
                -1
            } else {
                0
            }),
            (StartNode, Value::Edge(e)) => fetch_node(ctx, e.source)?,
            (EndNode, Value::Edge(e)) => fetch_node(ctx, e.target)?,
            _ => return Err(self.type_error(&first)),
        };
        Ok(result)
    }

    fn type_error(self, got: &Value) -> ExecutionError {
        ExecutionError::TypeError(format!(
            "Invalid input for function '{}()': got {}",
            self,
            got.type_name()
        ))
    }
}

impl fmt::Display for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ScalarFunction::*;
        let name = match self {
            Id => "id",
            ElementId => "elementId",
            Labels => "labels",
            Type => "type",
            Properties => "properties",
            Keys => "keys",
            Size => "size",
            Length => "length",
            Coalesce => "coalesce",
            ToUpper => "toUpper",
            ToLower => "toLower",
            Trim => "trim",
            LTrim => "ltrim",
            RTrim => "rtrim",
            Replace => "replace",
            Substring => "substring",
            Split => "split",
            ToString => "toString",
            ToInteger => "toInteger",
            ToFloat => "toFloat",
            ToBoolean => "toBoolean",
            Head => "head",
            Last => "last",
            Tail => "tail",
            Range => "range",
            Abs => "abs",
            Ceil => "ceil",
            Floor => "floor",
            Round => "round",
            Sqrt => "sqrt",
            Sign => "sign",
            StartNode => "startNode",
            EndNode => "endNode",
            Exists => "exists",
        };
        f.write_str(name)
    }
}

fn float_to_integer(f: f64) -> Value {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::Integer(f.trunc() as i64)
    } else {
        Value::Null
    }
}

fn fetch_node(ctx: &ExecutionContext<'_>, id: NodeId) -> ExecutionResult<Value> {
    Ok(ctx.storage.find_node(id)?.map(Value::node).unwrap_or(Value::Null))
}

fn integer_arg(value: &Value, function: &str) -> ExecutionResult<Option<i64>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(*i)),
        other => Err(ExecutionError::TypeError(format!(
            "Invalid input for function '{}()': expected an integer, got {}",
            function,
            other.type_name()
        ))),
    }
}

fn substring(s: &str, rest: &[Value]) -> ExecutionResult<Value> {
    let Some(start) = integer_arg(&rest[0], "substring")? else {
        return Ok(Value::Null);
    };
    let length = match rest.get(1) {
        Some(v) => match integer_arg(v, "substring")? {
            Some(len) => Some(len),
            None => return Ok(Value::Null),
        },
        None => None,
    };
    if start < 0 || length.is_some_and(|l| l < 0) {
        return Err(ExecutionError::InvalidArgument(
            "substring() start and length must be non-negative".to_string(),
        ));
    }
    let chars = s.chars().skip(start as usize);
    let result: String = match length {
        Some(len) => chars.take(len as usize).collect(),
        None => chars.collect(),
    };
    Ok(Value::String(result))
}

fn range(start: i64, rest: &[Value]) -> ExecutionResult<Value> {
    let Some(end) = integer_arg(&rest[0], "range")? else {
        return Ok(Value::Null);
    };
    let step = match rest.get(1) {
        Some(v) => integer_arg(v, "range")?.unwrap_or(1),
        None => 1,
    };
    if step == 0 {
        return Err(ExecutionError::InvalidArgument("range() step must not be zero".to_string()));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current <= end) || (step < 0 && current >= end) {
        items.push(Value::Integer(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::List(items))
}
