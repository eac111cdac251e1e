//! Runtime values flowing through query execution
//!
//! [`Value`] extends [`PropertyValue`] with the shapes that only exist while
//! a query runs: null, maps, nodes and relationships. Nodes and
//! relationships are shared snapshots taken when they were matched.

use crate::graph::{Edge, GraphError, Node, PropertyMap, PropertyValue};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A value bound to a slot or produced by an expression
#[derive(Debug, Clone, Default, Serialize)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Node(Arc<Node>),
    Edge(Arc<Edge>),
}

impl Value {
    pub fn node(node: Node) -> Self {
        Value::Node(Arc::new(node))
    }

    pub fn edge(edge: Edge) -> Self {
        Value::Edge(Arc::new(edge))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type name as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
            Value::Edge(_) => "Relationship",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers and floats as f64
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Value::Edge(e) => Some(e),
            _ => None,
        }
    }

    /// Converts to a storable property. `Ok(None)` means null, which
    /// removes a property rather than storing it.
    pub fn to_property(&self) -> Result<Option<PropertyValue>, GraphError> {
        let value = match self {
            Value::Null => return Ok(None),
            Value::Boolean(b) => PropertyValue::Boolean(*b),
            Value::Integer(i) => PropertyValue::Integer(*i),
            Value::Float(f) => PropertyValue::Float(*f),
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::List(items) => {
                let mut converted = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::List(_) => return Err(GraphError::NestedList),
                        Value::Null => return Err(GraphError::UnsupportedType("Null inside a list")),
                        other => {
                            if let Some(v) = other.to_property()? {
                                converted.push(v);
                            }
                        }
                    }
                }
                let list = PropertyValue::List(converted);
                list.validate()?;
                list
            }
            Value::Map(_) => return Err(GraphError::UnsupportedType("Map")),
            Value::Node(_) => return Err(GraphError::UnsupportedType("Node")),
            Value::Edge(_) => return Err(GraphError::UnsupportedType("Relationship")),
        };
        Ok(Some(value))
    }

    /// Equality under three-valued logic: `None` when the answer is unknown
    pub fn cypher_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Integer(a), Value::Integer(b)) => Some(a == b),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let (a, b) = (self.as_number()?, other.as_number()?);
                Some(a == b)
            }
            (Value::Boolean(a), Value::Boolean(b)) => Some(a == b),
            (Value::String(a), Value::String(b)) => Some(a == b),
            (Value::Node(a), Value::Node(b)) => Some(a.id == b.id),
            (Value::Edge(a), Value::Edge(b)) => Some(a.id == b.id),
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut unknown = false;
                for (x, y) in a.iter().zip(b) {
                    match x.cypher_eq(y) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            (Value::Map(a), Value::Map(b)) => {
                if a.len() != b.len() || a.keys().ne(b.keys()) {
                    return Some(false);
                }
                let mut unknown = false;
                for (x, y) in a.values().zip(b.values()) {
                    match x.cypher_eq(y) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            _ => Some(false),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. `None` for nulls and for values
    /// of incomparable types.
    pub fn cypher_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                self.as_number()?.partial_cmp(&other.as_number()?)
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.cypher_cmp(y)? {
                        Ordering::Equal => {}
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    fn order_rank(&self) -> u8 {
        match self {
            Value::Map(_) => 0,
            Value::Node(_) => 1,
            Value::Edge(_) => 2,
            Value::List(_) => 3,
            Value::String(_) => 4,
            Value::Boolean(_) => 5,
            Value::Integer(_) | Value::Float(_) => 6,
            Value::Null => 7,
        }
    }

    /// Total order used by ORDER BY, min and max:
    /// map < node < relationship < list < string < boolean < number < null
    pub fn order_cmp(&self, other: &Value) -> Ordering {
        let rank = self.order_rank().cmp(&other.order_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
                let a = self.as_number().unwrap_or(f64::NAN);
                let b = other.as_number().unwrap_or(f64::NAN);
                // NaN sorts above every other number
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                }
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Node(a), Value::Node(b)) => a.id.cmp(&b.id),
            (Value::Edge(a), Value::Edge(b)) => a.id.cmp(&b.id),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.order_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    let ord = ka.cmp(kb).then_with(|| va.order_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Property map of a node, relationship or map value
    pub fn properties(&self) -> Option<BTreeMap<String, Value>> {
        match self {
            Value::Node(n) => Some(properties_to_map(&n.properties)),
            Value::Edge(e) => Some(properties_to_map(&e.properties)),
            Value::Map(m) => Some(m.clone()),
            _ => None,
        }
    }
}

pub(crate) fn properties_to_map(properties: &PropertyMap) -> BTreeMap<String, Value> {
    properties.iter().map(|(k, v)| (k.clone(), Value::from(v.clone()))).collect()
}

fn float_key(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0.0f64.to_bits()
    } else {
        f.to_bits()
    }
}

/// Structural equality: integers and floats are distinct, NaN equals NaN,
/// nodes and relationships compare by id. Grouping goes through
/// [`Equivalent`] instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => float_key(*a) == float_key(*b),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => a.id == b.id,
            (Value::Edge(a), Value::Edge(b)) => a.id == b.id,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => float_key(*f).hash(state),
            Value::String(s) => s.hash(state),
            Value::List(items) => items.hash(state),
            Value::Map(map) => map.hash(state),
            Value::Node(n) => n.id.hash(state),
            Value::Edge(e) => e.id.hash(state),
        }
    }
}

/// A value under Cypher equivalence, the key for grouping and DISTINCT.
///
/// Unlike `==` on [`Value`], an integer and a float holding the same number
/// are one key, inside lists and maps too.
#[derive(Debug, Clone)]
pub struct Equivalent(pub Value);

impl Equivalent {
    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// The integer a float holds exactly, if any
fn integral(f: f64) -> Option<i64> {
    if f.fract() != 0.0 {
        return None;
    }
    let i = f as i64;
    (i as i128 == f as i128).then_some(i)
}

fn equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(i), Value::Float(f)) | (Value::Float(f), Value::Integer(i)) => integral(*f) == Some(*i),
        (Value::List(a), Value::List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equivalent(x, y)),
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|((ka, va), (kb, vb))| ka == kb && equivalent(va, vb))
        }
        _ => a == b,
    }
}

fn hash_equivalent<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Integer(i) => {
            0u8.hash(state);
            i.hash(state);
        }
        Value::Float(f) => match integral(*f) {
            Some(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            None => {
                1u8.hash(state);
                float_key(*f).hash(state);
            }
        },
        Value::List(items) => {
            2u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_equivalent(item, state);
            }
        }
        Value::Map(map) => {
            3u8.hash(state);
            map.len().hash(state);
            for (k, v) in map {
                k.hash(state);
                hash_equivalent(v, state);
            }
        }
        other => {
            4u8.hash(state);
            other.hash(state);
        }
    }
}

impl PartialEq for Equivalent {
    fn eq(&self, other: &Self) -> bool {
        equivalent(&self.0, &other.0)
    }
}

impl Eq for Equivalent {}

impl Hash for Equivalent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_equivalent(&self.0, state);
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Boolean(b) => Value::Boolean(b),
            PropertyValue::Integer(i) => Value::Integer(i),
            PropertyValue::Float(f) => Value::Float(f),
            PropertyValue::String(s) => Value::String(s),
            PropertyValue::List(items) => Value::List(items.into_iter().map(Value::from).collect()),
        }
    }
}

impl From<Option<&PropertyValue>> for Value {
    fn from(value: Option<&PropertyValue>) -> Self {
        value.cloned().map(Value::from).unwrap_or(Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Option<bool>> for Value {
    fn from(b: Option<bool>) -> Self {
        b.map(Value::Boolean).unwrap_or(Value::Null)
    }
}

fn write_map(f: &mut fmt::Formatter<'_>, entries: impl Iterator<Item = (String, String)>) -> fmt::Result {
    f.write_str("{")?;
    for (i, (k, v)) in entries.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}: {}", k, v)?;
    }
    f.write_str("}")
}

/// Cypher-style rendering; strings are printed without quotes
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", PropertyValue::Float(*x)),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Value::String(s) => write!(f, "\"{}\"", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("]")
            }
            Value::Map(map) => write_map(f, map.iter().map(|(k, v)| (k.clone(), v.to_string()))),
            Value::Node(n) => {
                write!(f, "(")?;
                for label in n.labels() {
                    write!(f, ":{}", label)?;
                }
                if !n.properties.is_empty() {
                    if !n.labels().is_empty() {
                        f.write_str(" ")?;
                    }
                    write_map(f, n.properties.iter().map(|(k, v)| (k.clone(), v.to_string())))?;
                }
                write!(f, ")")
            }
            Value::Edge(e) => {
                write!(f, "[:{}", e.edge_type)?;
                if !e.properties.is_empty() {
                    f.write_str(" ")?;
                    write_map(f, e.properties.iter().map(|(k, v)| (k.clone(), v.to_string())))?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Label, NodeId};

    #[test]
    fn test_three_valued_equality() {
        assert_eq!(Value::Integer(1).cypher_eq(&Value::Float(1.0)), Some(true));
        assert_eq!(Value::Integer(1).cypher_eq(&Value::from("1")), Some(false));
        assert_eq!(Value::Null.cypher_eq(&Value::Null), None);
        assert_eq!(
            Value::from(vec![Value::Integer(1), Value::Null]).cypher_eq(&Value::from(vec![2i64, 3])),
            Some(false)
        );
        assert_eq!(
            Value::from(vec![Value::Integer(1), Value::Null]).cypher_eq(&Value::from(vec![1i64, 3])),
            None
        );
    }

    #[test]
    fn test_comparison_of_mismatched_types_is_unknown() {
        assert_eq!(Value::Integer(2).cypher_cmp(&Value::Float(1.5)), Some(Ordering::Greater));
        assert_eq!(Value::from("a").cypher_cmp(&Value::Integer(1)), None);
        assert_eq!(Value::Null.cypher_cmp(&Value::Integer(1)), None);
        assert_eq!(Value::Float(f64::NAN).cypher_cmp(&Value::Float(1.0)), None);
    }

    #[test]
    fn test_global_sort_order() {
        let node = Value::node(Node::new(NodeId::new(1)));
        let mut values = vec![
            Value::Null,
            Value::Integer(3),
            Value::Boolean(false),
            Value::from("b"),
            Value::from(vec![1i64]),
            node.clone(),
            Value::Map(BTreeMap::new()),
            Value::Float(1.5),
        ];
        values.sort_by(|a, b| a.order_cmp(b));
        assert_eq!(values[0].type_name(), "Map");
        assert_eq!(values[1], node);
        assert_eq!(values[2].type_name(), "List");
        assert_eq!(values[3], Value::from("b"));
        assert_eq!(values[4], Value::Boolean(false));
        assert_eq!(values[5], Value::Float(1.5));
        assert_eq!(values[6], Value::Integer(3));
        assert!(values[7].is_null());
    }

    #[test]
    fn test_structural_equality_keeps_numeric_types_apart() {
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn test_equivalence_merges_integral_numbers() {
        let key = |v: Value| Equivalent(v);
        assert_eq!(key(Value::Integer(1)), key(Value::Float(1.0)));
        assert_ne!(key(Value::Integer(1)), key(Value::Float(1.5)));
        assert_ne!(key(Value::Integer(1)), key(Value::from("1")));
        assert_eq!(
            key(Value::from(vec![Value::Integer(2), Value::Float(3.0)])),
            key(Value::from(vec![Value::Float(2.0), Value::Integer(3)]))
        );
        // 2^63 is past i64::MAX, so no integer matches it
        assert_ne!(key(Value::Integer(i64::MAX)), key(Value::Float(9_223_372_036_854_775_808.0)));

        let mut set = rustc_hash::FxHashSet::default();
        for v in [Value::Integer(4), Value::Float(4.0), Value::Float(-0.0), Value::Integer(0)] {
            set.insert(key(v));
        }
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_to_property() {
        assert_eq!(Value::Null.to_property().unwrap(), None);
        assert_eq!(
            Value::from(vec!["a", "b"]).to_property().unwrap(),
            Some(PropertyValue::List(vec!["a".into(), "b".into()]))
        );
        assert!(Value::Map(BTreeMap::new()).to_property().is_err());
        assert!(Value::from(vec![Value::Integer(1), Value::from("x")]).to_property().is_err());

        let mut node = Node::new(NodeId::new(2));
        node.add_label(Label::new("A"));
        assert!(Value::node(node).to_property().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::from(vec!["x"]).to_string(), "[\"x\"]");
        assert_eq!(Value::from("plain").to_string(), "plain");
    }
}
