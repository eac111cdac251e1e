//! Physical operators for query execution
//!
//! Every operator implements `next()` and pulls from its input on demand.
//! Operators are instantiated per execution from a shared [`LogicalOp`]
//! tree; nested plans (OPTIONAL MATCH, the match half of MERGE) are
//! instantiated once per outer row.

use super::aggregate::{Accumulator, AggregateSpec};
use super::expr::Expr;
use super::planner::{ExpandSpec, LogicalOp, Seek, SortKey};
use super::write::{CreateOperator, DeleteOperator, MergeOperator, UpdateOperator};
use super::{Equivalent, ExecutionContext, ExecutionError, ExecutionResult, Record, Value};
use crate::graph::{Direction, Edge, EdgeId, Label, NodeId};
use crate::index::{IndexPredicate, PropertyIndexKey};
use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashSet};
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

/// Physical operator trait (Volcano iterator model)
pub trait PhysicalOperator: Send {
    /// Next record, or `None` when exhausted
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>>;
}

pub type OperatorBox = Box<dyn PhysicalOperator>;

/// Instantiates `op` with `argument` as the row its leaf produces
pub fn build(op: &LogicalOp, argument: Record) -> OperatorBox {
    let width = argument.width();
    let input = |input: &LogicalOp| build(input, argument.clone());
    match op {
        LogicalOp::Argument => Box::new(ArgumentOperator {
            record: Some(argument.clone()),
        }),
        LogicalOp::NodeScan { input: i, slot, labels } => Box::new(NodeScanOperator {
            input: input(i),
            slot: *slot,
            labels: labels.clone(),
            current: None,
            ids: Vec::new().into_iter(),
        }),
        LogicalOp::IndexSeek {
            input: i,
            slot,
            index,
            labels,
            seek,
        } => Box::new(IndexSeekOperator {
            input: input(i),
            slot: *slot,
            index: index.clone(),
            labels: labels.clone(),
            seek: seek.clone(),
            current: None,
            ids: Vec::new().into_iter(),
        }),
        LogicalOp::Expand { input: i, spec } => Box::new(ExpandOperator {
            input: input(i),
            spec: spec.clone(),
            buffer: VecDeque::new(),
            walk: None,
        }),
        LogicalOp::Filter { input: i, predicate, .. } => Box::new(FilterOperator {
            input: input(i),
            predicate: predicate.clone(),
        }),
        LogicalOp::UniqueRelationships { input: i, slots } => Box::new(UniqueRelationshipsOperator {
            input: input(i),
            slots: slots.clone(),
        }),
        LogicalOp::Optional { input: i, inner, slots } => Box::new(OptionalOperator {
            input: input(i),
            inner: Arc::clone(inner),
            slots: slots.clone(),
            buffer: VecDeque::new(),
        }),
        LogicalOp::Unwind { input: i, expr, slot } => Box::new(UnwindOperator {
            input: input(i),
            expr: expr.clone(),
            slot: *slot,
            current: None,
            items: Vec::new().into_iter(),
        }),
        LogicalOp::Project { input: i, items } => Box::new(ProjectOperator {
            input: input(i),
            items: items.clone(),
        }),
        LogicalOp::Aggregate {
            input: i,
            keys,
            aggregates,
        } => Box::new(AggregateOperator {
            input: input(i),
            keys: keys.clone(),
            aggregates: aggregates.clone(),
            width,
            output: None,
        }),
        LogicalOp::Distinct { input: i, slots } => Box::new(DistinctOperator {
            input: input(i),
            slots: slots.clone(),
            seen: FxHashSet::default(),
        }),
        LogicalOp::Sort { input: i, keys } => Box::new(SortOperator {
            input: input(i),
            keys: keys.clone(),
            sorted: None,
        }),
        LogicalOp::Skip { input: i, count } => Box::new(SkipOperator {
            input: input(i),
            remaining: *count,
        }),
        LogicalOp::Limit { input: i, count } => Box::new(LimitOperator {
            input: input(i),
            remaining: *count,
        }),
        LogicalOp::Create { input: i, pattern } => Box::new(CreateOperator::new(input(i), pattern.clone())),
        LogicalOp::Merge { input: i, spec } => Box::new(MergeOperator::new(input(i), Arc::clone(spec))),
        LogicalOp::Update { input: i, items } => Box::new(UpdateOperator::new(input(i), items.clone())),
        LogicalOp::Delete {
            input: i,
            targets,
            detach,
        } => Box::new(DeleteOperator::new(input(i), targets.clone(), *detach)),
    }
}

/// Yields its argument row once
pub struct ArgumentOperator {
    record: Option<Record>,
}

impl PhysicalOperator for ArgumentOperator {
    fn next(&mut self, _ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        Ok(self.record.take())
    }
}

/// Binds every node carrying all `labels`, once per input row
pub struct NodeScanOperator {
    input: OperatorBox,
    slot: usize,
    labels: Vec<Label>,
    current: Option<Record>,
    ids: std::vec::IntoIter<NodeId>,
}

impl PhysicalOperator for NodeScanOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(record) = &self.current {
                for id in self.ids.by_ref() {
                    ctx.token.check()?;
                    // Deleted since the scan started
                    let Some(node) = ctx.storage.find_node(id)? else {
                        continue;
                    };
                    if self.labels.iter().all(|l| node.has_label(l)) {
                        let mut out = record.clone();
                        out.set(self.slot, Value::node(node));
                        return Ok(Some(out));
                    }
                }
            }
            match self.input.next(ctx)? {
                None => return Ok(None),
                Some(record) => {
                    let ids = match self.labels.first() {
                        Some(label) => ctx.storage.nodes_by_label(label)?,
                        None => ctx.storage.all_node_ids()?,
                    };
                    self.ids = ids.into_iter();
                    self.current = Some(record);
                }
            }
        }
    }
}

/// Binds candidates from a property index. The predicate that chose the
/// index is re-checked by a filter above, so candidates may be a superset.
pub struct IndexSeekOperator {
    input: OperatorBox,
    slot: usize,
    index: PropertyIndexKey,
    labels: Vec<Label>,
    seek: Seek,
    current: Option<Record>,
    ids: std::vec::IntoIter<NodeId>,
}

impl IndexSeekOperator {
    fn bound(
        bound: &Option<(Expr, bool)>,
        record: &Record,
        ctx: &ExecutionContext<'_>,
    ) -> ExecutionResult<Option<Bound<crate::graph::PropertyValue>>> {
        let Some((expr, inclusive)) = bound else {
            return Ok(Some(Bound::Unbounded));
        };
        Ok(match expr.eval(record, ctx)?.to_property() {
            Ok(Some(v)) if *inclusive => Some(Bound::Included(v)),
            Ok(Some(v)) => Some(Bound::Excluded(v)),
            // A null or unstorable bound matches nothing
            _ => None,
        })
    }

    fn candidates(&self, record: &Record, ctx: &ExecutionContext<'_>) -> ExecutionResult<Vec<NodeId>> {
        let predicates = match &self.seek {
            Seek::Equals(expr) => match expr.eval(record, ctx)?.to_property() {
                Ok(Some(v)) => vec![IndexPredicate::Equals(v)],
                _ => Vec::new(),
            },
            Seek::In(expr) => match expr.eval(record, ctx)? {
                Value::List(items) => items
                    .iter()
                    .filter_map(|v| v.to_property().ok().flatten())
                    .map(IndexPredicate::Equals)
                    .collect(),
                _ => Vec::new(),
            },
            Seek::Range { lower, upper } => {
                match (Self::bound(lower, record, ctx)?, Self::bound(upper, record, ctx)?) {
                    (Some(lower), Some(upper)) => vec![IndexPredicate::Range { lower, upper }],
                    _ => Vec::new(),
                }
            }
        };

        let mut ids = Vec::new();
        let mut seen = FxHashSet::default();
        for predicate in &predicates {
            match ctx
                .storage
                .index_lookup(&self.index.label, &self.index.property, predicate)?
            {
                Some(found) => ids.extend(found.into_iter().filter(|id| seen.insert(*id))),
                // Index dropped after planning
                None => return Ok(ctx.storage.nodes_by_label(&self.index.label)?),
            }
        }
        Ok(ids)
    }
}

impl PhysicalOperator for IndexSeekOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(record) = &self.current {
                for id in self.ids.by_ref() {
                    ctx.token.check()?;
                    let Some(node) = ctx.storage.find_node(id)? else {
                        continue;
                    };
                    if self.labels.iter().all(|l| node.has_label(l)) {
                        let mut out = record.clone();
                        out.set(self.slot, Value::node(node));
                        return Ok(Some(out));
                    }
                }
            }
            match self.input.next(ctx)? {
                None => return Ok(None),
                Some(record) => {
                    self.ids = self.candidates(&record, ctx)?.into_iter();
                    self.current = Some(record);
                }
            }
        }
    }
}

/// Follows relationships from a bound node, fixed or variable length
pub struct ExpandOperator {
    input: OperatorBox,
    spec: ExpandSpec,
    buffer: VecDeque<Record>,
    walk: Option<PathWalk>,
}

/// Resumable depth-first walk over the paths of one input row
///
/// Holds one pending edge list per hop on the current path, so memory is
/// bounded by depth times degree no matter how many paths exist.
struct PathWalk {
    record: Record,
    properties: Vec<(String, Value)>,
    min: u32,
    max: u32,
    stack: Vec<(NodeId, std::vec::IntoIter<EdgeId>)>,
    path: Vec<Arc<Edge>>,
}

impl ExpandOperator {
    fn node_id(value: &Value) -> ExecutionResult<Option<NodeId>> {
        match value {
            Value::Node(n) => Ok(Some(n.id)),
            Value::Null => Ok(None),
            other => Err(ExecutionError::TypeError(format!(
                "expected Node but was {}",
                other.type_name()
            ))),
        }
    }

    fn step(edge: &Edge, from: NodeId, direction: Direction) -> NodeId {
        match direction {
            Direction::Outgoing => edge.target,
            Direction::Incoming => edge.source,
            Direction::Both => edge.other_end(from).unwrap_or(edge.target),
        }
    }

    fn edge_matches(&self, edge: &Edge, properties: &[(String, Value)]) -> bool {
        (self.spec.types.is_empty() || self.spec.types.contains(&edge.edge_type))
            && properties
                .iter()
                .all(|(k, v)| Value::from(edge.get_property(k)).cypher_eq(v) == Some(true))
    }

    /// Value for the far node if it satisfies the pattern
    fn target(&self, record: &Record, id: NodeId, ctx: &ExecutionContext<'_>) -> ExecutionResult<Option<Value>> {
        if self.spec.into {
            return Ok(match record.get(self.spec.to) {
                Value::Node(n) if n.id == id && self.spec.to_labels.iter().all(|l| n.has_label(l)) => {
                    Some(Value::Node(Arc::clone(n)))
                }
                _ => None,
            });
        }
        Ok(ctx
            .storage
            .find_node(id)?
            .filter(|n| self.spec.to_labels.iter().all(|l| n.has_label(l)))
            .map(Value::node))
    }

    fn expand(&mut self, record: Record, ctx: &ExecutionContext<'_>) -> ExecutionResult<()> {
        let Some(from) = Self::node_id(record.get(self.spec.from))? else {
            return Ok(());
        };
        if self.spec.into && Self::node_id(record.get(self.spec.to))?.is_none() {
            return Ok(());
        }
        let properties = self
            .spec
            .edge_properties
            .iter()
            .map(|(k, e)| Ok((k.clone(), e.eval(&record, ctx)?)))
            .collect::<ExecutionResult<Vec<_>>>()?;
        let direction = self.spec.direction;

        let Some((min, max)) = self.spec.length else {
            for id in ctx.storage.neighbors(from, direction)? {
                let Some(edge) = ctx.storage.find_edge(id)? else {
                    continue;
                };
                if !self.edge_matches(&edge, &properties) {
                    continue;
                }
                if let Some(node) = self.target(&record, Self::step(&edge, from, direction), ctx)? {
                    let mut out = record.clone();
                    out.set(self.spec.edge, Value::edge(edge));
                    out.set(self.spec.to, node);
                    self.buffer.push_back(out);
                }
            }
            return Ok(());
        };

        if min == 0 {
            if let Some(out) = self.path_row(&record, from, &[], ctx)? {
                self.buffer.push_back(out);
            }
        }
        if max > 0 {
            let first = ctx.storage.neighbors(from, direction)?.into_iter();
            self.walk = Some(PathWalk {
                record,
                properties,
                min,
                max,
                stack: vec![(from, first)],
                path: Vec::new(),
            });
        }
        Ok(())
    }

    /// Next path row of `walk`, or `None` once every path is exhausted.
    /// A relationship appears at most once per path.
    fn advance(&self, walk: &mut PathWalk, ctx: &ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        let direction = self.spec.direction;
        loop {
            let Some((node, pending)) = walk.stack.last_mut() else {
                return Ok(None);
            };
            let node = *node;
            let Some(id) = pending.next() else {
                walk.stack.pop();
                walk.path.pop();
                continue;
            };
            ctx.token.check()?;
            if walk.path.iter().any(|e| e.id == id) {
                continue;
            }
            let Some(edge) = ctx.storage.find_edge(id)? else {
                continue;
            };
            if !self.edge_matches(&edge, &walk.properties) {
                continue;
            }
            let reached = Self::step(&edge, node, direction);
            walk.path.push(Arc::new(edge));
            let depth = walk.path.len() as u32;
            let out = if depth >= walk.min {
                self.path_row(&walk.record, reached, &walk.path, ctx)?
            } else {
                None
            };
            if depth < walk.max {
                let next = ctx.storage.neighbors(reached, direction)?.into_iter();
                walk.stack.push((reached, next));
            } else {
                walk.path.pop();
            }
            if out.is_some() {
                return Ok(out);
            }
        }
    }

    fn path_row(
        &self,
        record: &Record,
        end: NodeId,
        path: &[Arc<Edge>],
        ctx: &ExecutionContext<'_>,
    ) -> ExecutionResult<Option<Record>> {
        let Some(node) = self.target(record, end, ctx)? else {
            return Ok(None);
        };
        let mut edges: Vec<Value> = path.iter().map(|e| Value::Edge(Arc::clone(e))).collect();
        if self.spec.reverse_path {
            edges.reverse();
        }
        let mut out = record.clone();
        out.set(self.spec.edge, Value::List(edges));
        out.set(self.spec.to, node);
        Ok(Some(out))
    }
}

impl PhysicalOperator for ExpandOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            if let Some(mut walk) = self.walk.take() {
                if let Some(record) = self.advance(&mut walk, ctx)? {
                    self.walk = Some(walk);
                    return Ok(Some(record));
                }
                continue;
            }
            let Some(record) = self.input.next(ctx)? else {
                return Ok(None);
            };
            ctx.token.check()?;
            self.expand(record, ctx)?;
        }
    }
}

/// Passes rows whose predicate is true
pub struct FilterOperator {
    input: OperatorBox,
    predicate: Expr,
}

impl PhysicalOperator for FilterOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        while let Some(record) = self.input.next(ctx)? {
            if self.predicate.is_true(&record, ctx)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// Drops rows that bind one relationship twice
pub struct UniqueRelationshipsOperator {
    input: OperatorBox,
    slots: Vec<usize>,
}

impl PhysicalOperator for UniqueRelationshipsOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        'rows: while let Some(record) = self.input.next(ctx)? {
            let mut seen: FxHashSet<EdgeId> = FxHashSet::default();
            for slot in &self.slots {
                let unique = match record.get(*slot) {
                    Value::Edge(e) => seen.insert(e.id),
                    Value::List(items) => items.iter().all(|v| match v {
                        Value::Edge(e) => seen.insert(e.id),
                        _ => true,
                    }),
                    _ => true,
                };
                if !unique {
                    continue 'rows;
                }
            }
            return Ok(Some(record));
        }
        Ok(None)
    }
}

/// OPTIONAL MATCH: all inner matches per row, or the row padded with nulls
pub struct OptionalOperator {
    input: OperatorBox,
    inner: Arc<LogicalOp>,
    slots: Vec<usize>,
    buffer: VecDeque<Record>,
}

impl PhysicalOperator for OptionalOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            let Some(mut record) = self.input.next(ctx)? else {
                return Ok(None);
            };
            let mut inner = build(&self.inner, record.clone());
            while let Some(matched) = inner.next(ctx)? {
                self.buffer.push_back(matched);
            }
            if self.buffer.is_empty() {
                for slot in &self.slots {
                    record.set(*slot, Value::Null);
                }
                return Ok(Some(record));
            }
        }
    }
}

/// One row per list element; null gives no rows, a scalar gives one
pub struct UnwindOperator {
    input: OperatorBox,
    expr: Expr,
    slot: usize,
    current: Option<Record>,
    items: std::vec::IntoIter<Value>,
}

impl PhysicalOperator for UnwindOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        loop {
            if let Some(record) = &self.current {
                if let Some(item) = self.items.next() {
                    let mut out = record.clone();
                    out.set(self.slot, item);
                    return Ok(Some(out));
                }
            }
            let Some(record) = self.input.next(ctx)? else {
                return Ok(None);
            };
            self.items = match self.expr.eval(&record, ctx)? {
                Value::List(items) => items,
                Value::Null => Vec::new(),
                scalar => vec![scalar],
            }
            .into_iter();
            self.current = Some(record);
        }
    }
}

/// Evaluates items against the incoming row, then writes them to their slots
pub struct ProjectOperator {
    input: OperatorBox,
    items: Vec<(Expr, usize)>,
}

impl PhysicalOperator for ProjectOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        let Some(mut record) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let values = self
            .items
            .iter()
            .map(|(expr, _)| expr.eval(&record, ctx))
            .collect::<ExecutionResult<Vec<_>>>()?;
        for ((_, slot), value) in self.items.iter().zip(values) {
            record.set(*slot, value);
        }
        Ok(Some(record))
    }
}

/// Grouped aggregation. Groups come out in first-seen order; without
/// grouping keys, empty input still yields one row.
pub struct AggregateOperator {
    input: OperatorBox,
    keys: Vec<(Expr, usize)>,
    aggregates: Vec<AggregateSpec>,
    width: usize,
    output: Option<std::vec::IntoIter<Record>>,
}

impl AggregateOperator {
    fn drain(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Vec<Record>> {
        let mut groups: IndexMap<Vec<Equivalent>, Vec<Accumulator>, FxBuildHasher> = IndexMap::default();
        while let Some(record) = self.input.next(ctx)? {
            ctx.token.check()?;
            let key = self
                .keys
                .iter()
                .map(|(expr, _)| expr.eval(&record, ctx).map(Equivalent))
                .collect::<ExecutionResult<Vec<_>>>()?;
            let accumulators = groups
                .entry(key)
                .or_insert_with(|| self.aggregates.iter().map(Accumulator::new).collect());
            for (acc, spec) in accumulators.iter_mut().zip(&self.aggregates) {
                let value = match &spec.argument {
                    Some(expr) => expr.eval(&record, ctx)?,
                    None => Value::Null,
                };
                acc.update(value)?;
            }
        }
        if groups.is_empty() && self.keys.is_empty() {
            groups.insert(Vec::new(), self.aggregates.iter().map(Accumulator::new).collect());
        }

        Ok(groups
            .into_iter()
            .map(|(key, accumulators)| {
                let mut out = Record::new(self.width);
                for ((_, slot), value) in self.keys.iter().zip(key) {
                    out.set(*slot, value.into_inner());
                }
                for (acc, spec) in accumulators.into_iter().zip(&self.aggregates) {
                    out.set(spec.slot, acc.finish());
                }
                out
            })
            .collect())
    }
}

impl PhysicalOperator for AggregateOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.output.is_none() {
            self.output = Some(self.drain(ctx)?.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }
}

pub struct DistinctOperator {
    input: OperatorBox,
    slots: Vec<usize>,
    seen: FxHashSet<Vec<Equivalent>>,
}

impl PhysicalOperator for DistinctOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        while let Some(record) = self.input.next(ctx)? {
            if self.seen.insert(record.project(&self.slots).into_iter().map(Equivalent).collect()) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// Stable sort on the full input; nulls sort last ascending
pub struct SortOperator {
    input: OperatorBox,
    keys: Vec<SortKey>,
    sorted: Option<std::vec::IntoIter<Record>>,
}

impl SortOperator {
    fn drain(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Vec<Record>> {
        let mut rows = Vec::new();
        while let Some(record) = self.input.next(ctx)? {
            ctx.token.check()?;
            let key = self
                .keys
                .iter()
                .map(|k| k.expr.eval(&record, ctx))
                .collect::<ExecutionResult<Vec<_>>>()?;
            rows.push((key, record));
        }
        rows.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .zip(&self.keys)
                .map(|((x, y), key)| {
                    let ordering = x.order_cmp(y);
                    if key.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    }
                })
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(rows.into_iter().map(|(_, record)| record).collect())
    }
}

impl PhysicalOperator for SortOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.sorted.is_none() {
            self.sorted = Some(self.drain(ctx)?.into_iter());
        }
        Ok(self.sorted.as_mut().and_then(Iterator::next))
    }
}

pub struct SkipOperator {
    input: OperatorBox,
    remaining: usize,
}

impl PhysicalOperator for SkipOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        while self.remaining > 0 {
            if self.input.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.remaining -= 1;
        }
        self.input.next(ctx)
    }
}

/// Stops pulling from its input once the limit is reached
pub struct LimitOperator {
    input: OperatorBox,
    remaining: usize,
}

impl PhysicalOperator for LimitOperator {
    fn next(&mut self, ctx: &mut ExecutionContext<'_>) -> ExecutionResult<Option<Record>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.input.next(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeType, PropertyMap, PropertyValue};
    use crate::query::executor::{execute_plan, CancellationToken, Params, QueryPlanner, QueryStats};
    use crate::query::parser::parse_query_text;
    use crate::storage::{MemoryEngine, StorageEngine};
    use std::sync::Mutex;

    fn run(storage: &dyn StorageEngine, query: &str) -> ExecutionResult<Vec<Vec<Value>>> {
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
        execute_plan(&plan, &mut ctx)
    }

    fn person(storage: &MemoryEngine, name: &str, age: i64) -> NodeId {
        let mut props = PropertyMap::new();
        props.insert("name".into(), PropertyValue::String(name.into()));
        props.insert("age".into(), PropertyValue::Integer(age));
        storage.create_node(vec![Label::new("Person")], props).unwrap().id
    }

    /// a -> b -> c -> d, plus a -> c
    fn chain() -> MemoryEngine {
        let storage = MemoryEngine::new();
        let ids: Vec<NodeId> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, n)| person(&storage, n, 20 + i as i64))
            .collect();
        for (s, t) in [(0, 1), (1, 2), (2, 3), (0, 2)] {
            storage
                .create_edge(ids[s], ids[t], EdgeType::new("KNOWS"), PropertyMap::new())
                .unwrap();
        }
        storage
    }

    fn strings(rows: Vec<Vec<Value>>) -> Vec<String> {
        rows.into_iter().map(|r| r[0].to_string()).collect()
    }

    #[test]
    fn test_scan_filter_sort_limit() {
        let storage = chain();
        let rows = run(
            &storage,
            "MATCH (n:Person) WHERE n.age > 20 RETURN n.name ORDER BY n.age DESC SKIP 1 LIMIT 1",
        )
        .unwrap();
        assert_eq!(strings(rows), vec!["c"]);
    }

    #[test]
    fn test_expand_directions() {
        let storage = chain();
        let out = run(&storage, "MATCH (a {name: 'a'})-[:KNOWS]->(b) RETURN b.name ORDER BY b.name").unwrap();
        assert_eq!(strings(out), vec!["b", "c"]);
        let incoming = run(&storage, "MATCH (c {name: 'c'})<-[:KNOWS]-(x) RETURN x.name ORDER BY x.name").unwrap();
        assert_eq!(strings(incoming), vec!["a", "b"]);
        let both = run(&storage, "MATCH (c {name: 'c'})-[:KNOWS]-(x) RETURN count(x)").unwrap();
        assert_eq!(both, vec![vec![Value::Integer(3)]]);
    }

    #[test]
    fn test_variable_length_paths() {
        let storage = chain();
        let rows = run(
            &storage,
            "MATCH (a {name: 'a'})-[r:KNOWS*2..3]->(d {name: 'd'}) RETURN size(r) AS hops ORDER BY hops",
        )
        .unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(2)], vec![Value::Integer(3)]]);

        let zero = run(&storage, "MATCH (a {name: 'a'})-[*0..1]->(x) RETURN x.name ORDER BY x.name").unwrap();
        assert_eq!(strings(zero), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_relationship_uniqueness_within_match() {
        let storage = chain();
        let rows = run(&storage, "MATCH (x)-[r1]-(y)-[r2]-(x) RETURN count(*)").unwrap();
        // No two relationships join the same pair of nodes
        assert_eq!(rows, vec![vec![Value::Integer(0)]]);
    }

    #[test]
    fn test_optional_match_pads_with_null() {
        let storage = chain();
        let rows = run(
            &storage,
            "MATCH (n:Person) OPTIONAL MATCH (n)-[:KNOWS]->(m {name: 'b'}) RETURN n.name, m.name ORDER BY n.name",
        )
        .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec![Value::from("a"), Value::from("b")]);
        assert_eq!(rows[1], vec![Value::from("b"), Value::Null]);
    }

    #[test]
    fn test_unwind_and_aggregate() {
        let storage = MemoryEngine::new();
        let rows = run(
            &storage,
            "UNWIND [3, 1, 2, 1, null] AS x RETURN x, count(*) AS c ORDER BY c DESC, x",
        )
        .unwrap();
        assert_eq!(rows[0], vec![Value::Integer(1), Value::Integer(2)]);
        assert_eq!(rows.len(), 4);

        let empty = run(&storage, "MATCH (n:Nothing) RETURN count(n), sum(n.x), collect(n), avg(n.x)").unwrap();
        assert_eq!(
            empty,
            vec![vec![Value::Integer(0), Value::Integer(0), Value::List(vec![]), Value::Null]]
        );

        let grouped = run(&storage, "MATCH (n:Nothing) RETURN n.kind, count(*)").unwrap();
        assert!(grouped.is_empty());
    }

    #[test]
    fn test_distinct() {
        let storage = chain();
        let rows = run(&storage, "MATCH (a)-[:KNOWS]->(b) RETURN DISTINCT a.name ORDER BY a.name").unwrap();
        assert_eq!(strings(rows), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cancelled_token_stops_execution() {
        let storage = chain();
        let query = parse_query_text("MATCH (n) RETURN n").unwrap();
        let params = Params::new();
        let plan = QueryPlanner::new(&params, vec![], 15).plan(&query).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let merge_lock = Mutex::new(());
        let mut ctx = ExecutionContext {
            storage: &storage,
            token: &token,
            merge_lock: &merge_lock,
            database: "neo4j",
            stats: QueryStats::default(),
        };
        assert!(matches!(execute_plan(&plan, &mut ctx), Err(ExecutionError::Cancelled)));
    }

    /// Every node linked to every other node in both directions
    fn complete(n: usize) -> MemoryEngine {
        let storage = MemoryEngine::new();
        let ids: Vec<NodeId> = (0..n).map(|i| person(&storage, &format!("p{}", i), i as i64)).collect();
        for s in &ids {
            for t in &ids {
                if s != t {
                    storage
                        .create_edge(*s, *t, EdgeType::new("KNOWS"), PropertyMap::new())
                        .unwrap();
                }
            }
        }
        storage
    }

    #[test]
    fn test_variable_length_yields_rows_lazily() {
        // Far more paths of up to 15 hops exist than could ever be listed
        let storage = complete(10);
        let rows = run(&storage, "MATCH (a {name: 'p0'})-[*1..15]->(b) RETURN b.name LIMIT 3").unwrap();
        assert_eq!(rows.len(), 3);

        let deep = run(
            &storage,
            "MATCH (a {name: 'p0'})-[r*12..15]->(b) RETURN size(r) AS hops LIMIT 1",
        )
        .unwrap();
        assert_eq!(deep, vec![vec![Value::Integer(12)]]);
    }

    #[test]
    fn test_deadline_interrupts_expansion() {
        let storage = complete(10);
        let query = parse_query_text("MATCH (a {name: 'p0'})-[*1..15]->(b) RETURN count(b)").unwrap();
        let params = Params::new();
        let plan = QueryPlanner::new(&params, vec![], 15).plan(&query).unwrap();
        let token = CancellationToken::with_timeout(std::time::Duration::from_millis(50));
        let merge_lock = Mutex::new(());
        let mut ctx = ExecutionContext {
            storage: &storage,
            token: &token,
            merge_lock: &merge_lock,
            database: "neo4j",
            stats: QueryStats::default(),
        };
        assert!(matches!(execute_plan(&plan, &mut ctx), Err(ExecutionError::Timeout)));
    }
}
