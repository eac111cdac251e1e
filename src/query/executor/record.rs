//! Records flowing through the Volcano iterator pipeline
//!
//! A record is a fixed-width row of slots. The planner assigns every
//! variable a slot index, so operators never look names up at run time.

use super::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    /// All-null record with `width` slots
    pub fn new(width: usize) -> Self {
        Self {
            values: vec![Value::Null; width],
        }
    }

    pub fn get(&self, slot: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(slot).unwrap_or(&NULL)
    }

    pub fn set(&mut self, slot: usize, value: Value) {
        if slot >= self.values.len() {
            self.values.resize(slot + 1, Value::Null);
        }
        self.values[slot] = value;
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }

    /// Values of the given slots, in order
    pub fn project(&self, slots: &[usize]) -> Vec<Value> {
        slots.iter().map(|&s| self.get(s).clone()).collect()
    }

    /// Replaces every snapshot of an updated node or relationship
    pub fn refresh(&mut self, updated: &Value) {
        for value in &mut self.values {
            let same = match (&*value, updated) {
                (Value::Node(a), Value::Node(b)) => a.id == b.id,
                (Value::Edge(a), Value::Edge(b)) => a.id == b.id,
                _ => false,
            };
            if same {
                *value = updated.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeId};

    #[test]
    fn test_slots_default_to_null() {
        let mut record = Record::new(3);
        assert!(record.get(2).is_null());
        assert!(record.get(10).is_null());
        record.set(1, Value::Integer(7));
        assert_eq!(record.project(&[1, 0]), vec![Value::Integer(7), Value::Null]);
    }

    #[test]
    fn test_refresh_replaces_all_copies() {
        let mut node = Node::new(NodeId::new(4));
        let mut record = Record::new(2);
        record.set(0, Value::node(node.clone()));
        record.set(1, Value::node(node.clone()));

        node.set_property("x", 1i64);
        record.refresh(&Value::node(node));
        for slot in 0..2 {
            assert!(record.get(slot).as_node().unwrap().has_property("x"));
        }
    }
}
