//! Value mapping to and from the Neo4j JSON vocabulary

use crate::graph::{EdgeId, NodeId, PropertyMap, PropertyValue};
use crate::query::{Params, Value};
use serde_json::{json, Map, Number};
use std::collections::BTreeMap;

pub fn node_element_id(database: &str, id: NodeId) -> String {
    format!("4:{}:{}", database, id.as_u64())
}

pub fn edge_element_id(database: &str, id: EdgeId) -> String {
    format!("5:{}:{}", database, id.as_u64())
}

fn float_to_json(f: f64) -> serde_json::Value {
    Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

pub fn property_to_json(value: &PropertyValue) -> serde_json::Value {
    match value {
        PropertyValue::Boolean(b) => serde_json::Value::Bool(*b),
        PropertyValue::Integer(i) => serde_json::Value::from(*i),
        PropertyValue::Float(f) => float_to_json(*f),
        PropertyValue::String(s) => serde_json::Value::String(s.clone()),
        PropertyValue::List(items) => items.iter().map(property_to_json).collect(),
    }
}

fn properties_to_json(properties: &PropertyMap) -> serde_json::Value {
    serde_json::Value::Object(
        properties
            .iter()
            .map(|(k, v)| (k.clone(), property_to_json(v)))
            .collect(),
    )
}

/// The `row` form of a value: graph elements collapse to their properties
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Float(f) => float_to_json(*f),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => items.iter().map(value_to_json).collect(),
        Value::Map(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect(),
        ),
        Value::Node(node) => properties_to_json(&node.properties),
        Value::Edge(edge) => properties_to_json(&edge.properties),
    }
}

/// The `meta` entry accompanying [`value_to_json`]
pub fn value_meta(value: &Value, database: &str) -> serde_json::Value {
    match value {
        Value::Node(node) => json!({
            "id": node.id.as_u64(),
            "elementId": node_element_id(database, node.id),
            "type": "node",
            "deleted": false,
        }),
        Value::Edge(edge) => json!({
            "id": edge.id.as_u64(),
            "elementId": edge_element_id(database, edge.id),
            "type": "relationship",
            "deleted": false,
        }),
        Value::List(items) => items.iter().map(|v| value_meta(v, database)).collect(),
        _ => serde_json::Value::Null,
    }
}

/// Parameter value from JSON. Integral numbers that fit `i64` stay integers.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Float),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

pub fn params_from_json(parameters: &Map<String, serde_json::Value>) -> Params {
    parameters
        .iter()
        .map(|(k, v)| (k.clone(), json_to_value(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeType, Label, Node};

    fn person() -> Value {
        let mut node = Node::new(NodeId::new(7));
        node.add_label(Label::new("Person"));
        node.set_property("name", "Ada");
        node.set_property("born", 1815i64);
        Value::node(node)
    }

    #[test]
    fn test_element_ids() {
        assert_eq!(node_element_id("neo4j", NodeId::new(3)), "4:neo4j:3");
        assert_eq!(edge_element_id("movies", EdgeId::new(0)), "5:movies:0");
    }

    #[test]
    fn test_row_and_meta_for_node() {
        let value = person();
        assert_eq!(value_to_json(&value), json!({"name": "Ada", "born": 1815}));
        assert_eq!(
            value_meta(&value, "neo4j"),
            json!({"id": 7, "elementId": "4:neo4j:7", "type": "node", "deleted": false})
        );
        assert_eq!(value_meta(&Value::Integer(1), "neo4j"), serde_json::Value::Null);
    }

    #[test]
    fn test_json_numbers_keep_their_type() {
        let params = params_from_json(
            json!({"i": 42, "f": 1.5, "whole": 2.0, "xs": [1, "a"], "m": {"k": null}})
                .as_object()
                .unwrap(),
        );
        assert_eq!(params["i"], Value::Integer(42));
        assert!(matches!(params["f"], Value::Float(f) if f == 1.5));
        assert!(matches!(params["whole"], Value::Float(_)));
        assert_eq!(params["xs"], Value::List(vec![Value::Integer(1), Value::from("a")]));
        assert!(matches!(&params["m"], Value::Map(m) if m["k"].is_null()));
    }

    #[test]
    fn test_non_finite_float_is_null() {
        assert_eq!(value_to_json(&Value::Float(f64::NAN)), serde_json::Value::Null);
    }

    #[test]
    fn test_row_and_meta_for_relationship() {
        let mut edge = Edge::new(EdgeId::new(1), NodeId::new(2), NodeId::new(3), EdgeType::new("KNOWS"), PropertyMap::new());
        edge.set_property("since", 2001i64);
        let value = Value::edge(edge);
        assert_eq!(value_to_json(&value), json!({"since": 2001}));
        assert_eq!(
            value_meta(&value, "neo4j"),
            json!({"id": 1, "elementId": "5:neo4j:1", "type": "relationship", "deleted": false})
        );
    }
}
