//! Write operators: CREATE, MERGE, SET/REMOVE and DELETE
//!
//! Each storage call is atomic on its own; there is no rollback across
//! the rows of one query. Written entities are re-bound in the record so
//! later clauses see the updated state.

use super::operator::{build, OperatorBox, PhysicalOperator};
use super::planner::{CreatePattern, MergeSpec, UpdateItem};
use super::expr::Expr;
use super::{ExecutionContext, ExecutionError, ExecutionResult, Record, Value};
use crate::graph::{ChangeSummary, EdgeId, NodeChange, NodeId, PropertyChange, PropertyMap};
use crate::storage::StorageError;
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

fn evaluate_properties(
    properties: &[(String, Expr)],
    record: &Record,
    ctx: &ExecutionContext<'_>,
    strict_nulls: bool,
) -> ExecutionResult<PropertyMap> {
    let mut map = PropertyMap::new();
    for (key, expr) in properties {
        match expr.eval(record, ctx)?.to_property()? {
            Some(value) => {
                map.insert(key.clone(), value);
            }
            None if strict_nulls => {
                return Err(ExecutionError::Runtime(format!(
                    "Cannot merge the following node because of null property value for '{}'",
                    key
                )))
            }
            None => {}
        }
    }
    Ok(map)
}

fn endpoint(record: &Record, slot: usize) -> ExecutionResult<NodeId> {
    match record.get(slot) {
        Value::Node(n) => Ok(n.id),
        Value::Null => Err(ExecutionError::Runtime(
            "Failed to create relationship, endpoint node is missing".to_string(),
        )),
        other => Err(ExecutionError::TypeError(format!(
            "expected Node but was {}",
            other.type_name()
        ))),
    }
}

/// Creates every element of `pattern` and binds it in `record`
pub(crate) fn create(pattern: &CreatePattern, record: &mut Record, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<()> {
    for node in &pattern.nodes {
        let properties = evaluate_properties(&node.properties, record, ctx, pattern.strict_nulls)?;
        let property_count = properties.len();
        let created = ctx.storage.create_node(node.labels.clone(), properties)?;
        ctx.stats.nodes_created += 1;
        ctx.stats.labels_added += created.labels().len();
        ctx.stats.properties_set += property_count;
        record.set(node.slot, Value::node(created));
    }
    for edge in &pattern.edges {
        let source = endpoint(record, edge.source)?;
        let target = endpoint(record, edge.target)?;
        let properties = evaluate_properties(&edge.properties, record, ctx, pattern.strict_nulls)?;
        let property_count = properties.len();
        let created = ctx
            .storage
            .create_edge(source, target, edge.edge_type.clone(), properties)?;
        ctx.stats.relationships_created += 1;
        ctx.stats.properties_set += property_count;
        record.set(edge.slot, Value::edge(created));
    }
    Ok(())
}

fn count(ctx: &mut ExecutionContext<'_>, summary: &ChangeSummary) {
    ctx.stats.properties_set += summary.properties_set;
    ctx.stats.labels_added += summary.labels_added;
    ctx.stats.labels_removed += summary.labels_removed;
}

/// Map whose entries a `+=` or `=` assignment writes
fn assignment_map(value: Value) -> ExecutionResult<BTreeMap<String, Value>> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Map(map) => Ok(map),
        other => other.properties().ok_or_else(|| {
            ExecutionError::TypeError(format!("expected Map but was {}", other.type_name()))
        }),
    }
}

fn property_changes(map: BTreeMap<String, Value>, replace: bool) -> ExecutionResult<Vec<PropertyChange>> {
    let mut changes = Vec::with_capacity(map.len() + 1);
    if replace {
        changes.push(PropertyChange::Clear);
    }
    for (key, value) in map {
        match value.to_property()? {
            Some(v) => changes.push(PropertyChange::Set(key, v)),
            None if replace => {}
            None => changes.push(PropertyChange::Remove(key)),
        }
    }
    Ok(changes)
}

/// Applies property changes to the node or relationship in `slot`.
/// A null target is a no-op.
fn change_properties(
    record: &mut Record,
    slot: usize,
    changes: Vec<PropertyChange>,
    ctx: &mut ExecutionContext<'_>,
) -> ExecutionResult<()> {
    let updated = match record.get(slot) {
        Value::Null => return Ok(()),
        Value::Node(n) => {
            let changes: Vec<NodeChange> = changes.into_iter().map(NodeChange::Property).collect();
            let (node, summary) = ctx.storage.update_node(n.id, &changes)?;
            count(ctx, &summary);
            Value::node(node)
        }
        Value::Edge(e) => {
            let (edge, summary) = ctx.storage.update_edge(e.id, &changes)?;
            count(ctx, &summary);
            Value::edge(edge)
        }
        other => {
            return Err(ExecutionError::TypeError(format!(
                "expected Node or Relationship but was {}",
                other.type_name()
            )))
        }
    };
    record.refresh(&updated);
    Ok(())
}

fn change_labels(
    record: &mut Record,
    slot: usize,
    changes: Vec<NodeChange>,
    ctx: &mut ExecutionContext<'_>,
) -> ExecutionResult<()> {
    let updated = match record.get(slot) {
        Value::Null => return Ok(()),
        Value::Node(n) => {
            let (node, summary) = ctx.storage.update_node(n.id, &changes)?;
            count(ctx, &summary);
            Value::node(node)
        }
        other => {
            return Err(ExecutionError::TypeError(format!(
                "expected Node but was {}",
                other.type_name()
            )))
        }
    };
    record.refresh(&updated);
    Ok(())
}

/// Applies SET and REMOVE items in order
pub(crate) fn apply_updates(
    items: &[UpdateItem],
    record: &mut Record,
    ctx: &mut ExecutionContext<'_>,
) -> ExecutionResult<()> {
    for item in items {
        match item {
            UpdateItem::SetProperty { slot, key, value } => {
                let change = match value.eval(record, ctx)?.to_property()? {
                    Some(v) => PropertyChange::Set(key.clone(), v),
                    // Assigning null removes the property
                    None => PropertyChange::Remove(key.clone()),
                };
                change_properties(record, *slot, vec![change], ctx)?;
            }
            UpdateItem::MergeProperties { slot, value } => {
                let map = assignment_map(value.eval(record, ctx)?)?;
                change_properties(record, *slot, property_changes(map, false)?, ctx)?;
            }
            UpdateItem::ReplaceProperties { slot, value } => {
                let map = assignment_map(value.eval(record, ctx)?)?;
                change_properties(record, *slot, property_changes(map, true)?, ctx)?;
            }
            UpdateItem::RemoveProperty { slot, key } => {
                change_properties(record, *slot, vec![PropertyChange::Remove(key.clone())], ctx)?;
            }
            UpdateItem::SetLabels { slot, labels } => {
                let changes = labels.iter().cloned().map(NodeChange::AddLabel).collect();
                change_labels(record, *slot, changes, ctx)?;
            }
            UpdateItem::RemoveLabels { slot, labels } => {
                let changes = labels.iter().cloned().map(NodeChange::RemoveLabel).collect();
                change_labels(record, *slot, changes, ctx)?;
            }
        }
    }
    Ok(())
}

pub struct CreateOperator {
    input: OperatorBox,
    pattern: CreatePattern,
}

impl CreateOperator {
    pub fn new(input: OperatorBox, pattern: CreatePattern) -> Self {
        Self { input, pattern }
    }
}

impl PhysicalOperator for CreateOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        let Some(mut record) = self.input.next(ctx)? else {
            return Ok(None);
        };
        ctx.token.check()?;
        create(&self.pattern, &mut record, ctx)?;
        Ok(Some(record))
    }
}

/// MERGE: match the pattern, or create it when nothing matches.
///
/// The match-or-create step for one row holds the engine-wide merge lock,
/// so concurrent identical MERGEs create the pattern once.
pub struct MergeOperator {
    input: OperatorBox,
    spec: Arc<MergeSpec>,
    buffer: VecDeque<Record>,
}

impl MergeOperator {
    pub fn new(input: OperatorBox, spec: Arc<MergeSpec>) -> Self {
        Self {
            input,
            spec,
            buffer: VecDeque::new(),
        }
    }
}

impl PhysicalOperator for MergeOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let Some(mut record) = self.input.next(ctx)? else {
                return Ok(None);
            };
            ctx.token.check()?;

            let lock = ctx.merge_lock;
            let _guard = lock
                .lock()
                .map_err(|_| ExecutionError::Storage(StorageError::LockPoisoned("merge")))?;

            let mut matcher = build(&self.spec.matcher, record.clone());
            let mut matched = Vec::new();
            while let Some(found) = matcher.next(ctx)? {
                matched.push(found);
            }

            if matched.is_empty() {
                debug!("MERGE found no match, creating pattern");
                create(&self.spec.create, &mut record, ctx)?;
                apply_updates(&self.spec.on_create, &mut record, ctx)?;
                self.buffer.push_back(record);
            } else {
                for mut found in matched {
                    apply_updates(&self.spec.on_match, &mut found, ctx)?;
                    self.buffer.push_back(found);
                }
            }
        }
    }
}

/// SET and REMOVE
pub struct UpdateOperator {
    input: OperatorBox,
    items: Vec<UpdateItem>,
}

impl UpdateOperator {
    pub fn new(input: OperatorBox, items: Vec<UpdateItem>) -> Self {
        Self { input, items }
    }
}

impl PhysicalOperator for UpdateOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        let Some(mut record) = self.input.next(ctx)? else {
            return Ok(None);
        };
        apply_updates(&self.items, &mut record, ctx)?;
        Ok(Some(record))
    }
}

/// DELETE and DETACH DELETE.
///
/// Eager: all input rows are collected before anything is deleted, so a
/// row can never observe a half-deleted graph. Relationships go first;
/// then a plain DELETE fails if a node still has relationships that this
/// query is not deleting.
pub struct DeleteOperator {
    input: OperatorBox,
    targets: Vec<Expr>,
    detach: bool,
    output: Option<std::vec::IntoIter<Record>>,
}

impl DeleteOperator {
    pub fn new(input: OperatorBox, targets: Vec<Expr>, detach: bool) -> Self {
        Self {
            input,
            targets,
            detach,
            output: None,
        }
    }

    fn collect(value: Value, nodes: &mut Vec<NodeId>, edges: &mut Vec<EdgeId>) -> ExecutionResult<()> {
        match value {
            Value::Null => {}
            Value::Node(n) => nodes.push(n.id),
            Value::Edge(e) => edges.push(e.id),
            Value::List(items) => {
                for item in items {
                    Self::collect(item, nodes, edges)?;
                }
            }
            other => {
                return Err(ExecutionError::TypeError(format!(
                    "expected Node or Relationship but was {}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn delete_all(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Vec<Record>> {
        let mut rows = Vec::new();
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        while let Some(record) = self.input.next(ctx)? {
            ctx.token.check()?;
            for target in &self.targets {
                Self::collect(target.eval(&record, ctx)?, &mut nodes, &mut edges)?;
            }
            rows.push(record);
        }
        let mut seen = FxHashSet::default();
        nodes.retain(|id| seen.insert(*id));
        let mut seen = FxHashSet::default();
        edges.retain(|id| seen.insert(*id));

        if !self.detach {
            let deleting: FxHashSet<EdgeId> = edges.iter().copied().collect();
            for node in &nodes {
                let attached = match ctx.storage.neighbors(*node, crate::graph::Direction::Both) {
                    Ok(ids) => ids,
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                };
                if attached.iter().any(|id| !deleting.contains(id)) {
                    return Err(StorageError::NodeHasRelationships(*node).into());
                }
            }
        }

        for id in edges {
            match ctx.storage.delete_edge(id) {
                Ok(()) => ctx.stats.relationships_deleted += 1,
                // Already removed, e.g. by an earlier DETACH DELETE
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        for id in nodes {
            match ctx.storage.delete_node(id, self.detach) {
                Ok(detached) => {
                    ctx.stats.nodes_deleted += 1;
                    ctx.stats.relationships_deleted += detached;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(
            nodes = ctx.stats.nodes_deleted,
            relationships = ctx.stats.relationships_deleted,
            "delete finished"
        );
        Ok(rows)
    }
}

impl PhysicalOperator for DeleteOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.output.is_none() {
            self.output = Some(self.delete_all(ctx)?.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::executor::{execute_plan, CancellationToken, Params, QueryPlanner, QueryStats};
    use crate::query::parser::parse_query_text;
    use crate::storage::{MemoryEngine, StorageEngine};
    use std::sync::Mutex;

    fn run(storage: &dyn StorageEngine, query: &str) -> (ExecutionResult<Vec<Vec<Value>>>, QueryStats) {
        let query = parse_query_text(query).unwrap();
        let params = Params::new();
        let plan = QueryPlanner::new(&params, storage.indexes(), 15).plan(&query).unwrap();
        let token = CancellationToken::new();
        let merge_lock = Mutex::new(());
        let mut ctx = ExecutionContext {
            storage,
            token: &token,
            merge_lock: &merge_lock,
            database: "neo4j",
            stats: QueryStats::default(),
        };
        let result = execute_plan(&plan, &mut ctx);
        (result, ctx.stats)
    }

    #[test]
    fn test_create_path_counts_stats() {
        let storage = MemoryEngine::new();
        let (rows, stats) = run(
            &storage,
            "CREATE (a:Person {name: 'A', skip: null})-[r:KNOWS {since: 2020}]->(b:Person:Admin) RETURN a.name, type(r)",
        );
        assert_eq!(rows.unwrap(), vec![vec![Value::from("A"), Value::from("KNOWS")]]);
        assert_eq!(stats.nodes_created, 2);
        assert_eq!(stats.relationships_created, 1);
        assert_eq!(stats.labels_added, 3);
        assert_eq!(stats.properties_set, 2);
        assert_eq!(storage.edge_count().unwrap(), 1);
    }

    #[test]
    fn test_merge_matches_or_creates() {
        let storage = MemoryEngine::new();
        let query = "MERGE (c:City {name: 'Oslo'}) ON CREATE SET c.created = true ON MATCH SET c.seen = true RETURN c.created, c.seen";
        let (first, stats) = run(&storage, query);
        assert_eq!(first.unwrap(), vec![vec![Value::Boolean(true), Value::Null]]);
        assert_eq!(stats.nodes_created, 1);

        let (second, stats) = run(&storage, query);
        assert_eq!(second.unwrap(), vec![vec![Value::Boolean(true), Value::Boolean(true)]]);
        assert_eq!(stats.nodes_created, 0);
        assert_eq!(storage.node_count().unwrap(), 1);
    }

    #[test]
    fn test_merge_rejects_null_property() {
        let storage = MemoryEngine::new();
        let (result, _) = run(&storage, "MERGE (c:City {name: null}) RETURN c");
        assert!(matches!(result, Err(ExecutionError::Runtime(_))));
    }

    #[test]
    fn test_set_and_remove() {
        let storage = MemoryEngine::new();
        run(&storage, "CREATE (:P {a: 1, b: 2})").0.unwrap();

        let (rows, stats) = run(&storage, "MATCH (n:P) SET n.a = null, n += {c: 3}, n:Q RETURN n.a, n.c, labels(n)");
        assert_eq!(
            rows.unwrap(),
            vec![vec![Value::Null, Value::Integer(3), Value::from(vec!["P", "Q"])]]
        );
        assert_eq!(stats.properties_set, 2);
        assert_eq!(stats.labels_added, 1);

        let (rows, stats) = run(&storage, "MATCH (n:P) SET n = {z: 0} REMOVE n:Q RETURN keys(n), labels(n)");
        assert_eq!(
            rows.unwrap(),
            vec![vec![Value::from(vec!["z"]), Value::from(vec!["P"])]]
        );
        assert_eq!(stats.labels_removed, 1);
    }

    #[test]
    fn test_delete_requires_detach() {
        let storage = MemoryEngine::new();
        run(&storage, "CREATE (:A)-[:R]->(:B)").0.unwrap();

        let (result, _) = run(&storage, "MATCH (a:A) DELETE a");
        assert!(matches!(
            result,
            Err(ExecutionError::Storage(StorageError::NodeHasRelationships(_)))
        ));
        assert_eq!(storage.node_count().unwrap(), 2);

        let (result, stats) = run(&storage, "MATCH (a:A)-[r]->() DELETE r, a");
        result.unwrap();
        assert_eq!(stats.nodes_deleted, 1);
        assert_eq!(stats.relationships_deleted, 1);

        run(&storage, "CREATE (:A)-[:R]->(:B)").0.unwrap();
        let (result, stats) = run(&storage, "MATCH (n) DETACH DELETE n");
        result.unwrap();
        assert_eq!(stats.nodes_deleted, 3);
        assert_eq!(stats.relationships_deleted, 1);
        assert_eq!(storage.node_count().unwrap(), 0);
    }
}
