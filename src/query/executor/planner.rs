//! Query planner: AST to logical plan
//!
//! Planning resolves every variable to a record slot, substitutes
//! parameters, validates function names and arities, and picks an access
//! path per pattern. Rules, in order of preference:
//! 1. a pattern touching an already bound node expands from it
//! 2. a node whose WHERE conjuncts hit a property index starts with a seek
//! 3. otherwise the first node of the path is scanned by label
//!
//! Each WHERE conjunct is applied as soon as all variables it mentions are
//! bound, so filters sit directly above the scan or expand that completes
//! them and always below any aggregation.

use super::aggregate::{AggregateFunction, AggregateSpec};
use super::expr::{compile_regex, Expr};
use super::functions::{is_aggregate, ScalarFunction};
use super::{Params, Value};
use crate::graph::{Direction, EdgeType, Label};
use crate::index::PropertyIndexKey;
use crate::query::ast::*;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

/// Planning errors; all of them are reported as semantic errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Variable `{0}` not defined")]
    UndefinedVariable(String),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Expected parameter(s): {0}")]
    MissingParameter(String),

    #[error("{0}")]
    Semantic(String),
}

pub type PlanResult<T> = Result<T, PlanError>;

fn semantic<T>(message: impl Into<String>) -> PlanResult<T> {
    Err(PlanError::Semantic(message.into()))
}

/// Variable name to slot, in binding order
type Scope = IndexMap<String, usize>;

/// Names the planner invents for anonymous pattern elements start with
/// whitespace, which no identifier can
fn is_hidden(name: &str) -> bool {
    name.starts_with(' ')
}

/// How an index seek finds its candidates
#[derive(Debug, Clone)]
pub enum Seek {
    Equals(Expr),
    /// Value must be a list; each element is looked up
    In(Expr),
    /// Either bound may be open; the flag marks an inclusive bound
    Range {
        lower: Option<(Expr, bool)>,
        upper: Option<(Expr, bool)>,
    },
}

#[derive(Debug, Clone)]
pub struct ExpandSpec {
    pub from: usize,
    pub edge: usize,
    pub to: usize,
    pub types: Vec<EdgeType>,
    pub direction: Direction,
    pub edge_properties: Vec<(String, Expr)>,
    pub to_labels: Vec<Label>,
    /// Variable length `(min, max)` hops; the edge slot then holds a list
    pub length: Option<(u32, u32)>,
    /// Target already bound: only edges reaching it qualify
    pub into: bool,
    /// Expansion runs against the pattern's written direction, so a
    /// variable length path list must be reversed
    pub reverse_path: bool,
}

#[derive(Debug, Clone)]
pub struct CreateNode {
    pub slot: usize,
    pub labels: Vec<Label>,
    pub properties: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
pub struct CreateEdge {
    pub slot: usize,
    pub source: usize,
    pub target: usize,
    pub edge_type: EdgeType,
    pub properties: Vec<(String, Expr)>,
}

/// Elements a CREATE or a failed MERGE match brings into existence
#[derive(Debug, Clone, Default)]
pub struct CreatePattern {
    pub nodes: Vec<CreateNode>,
    pub edges: Vec<CreateEdge>,
    /// Null property values are an error instead of being skipped
    pub strict_nulls: bool,
}

#[derive(Debug, Clone)]
pub struct MergeSpec {
    pub matcher: Arc<LogicalOp>,
    pub create: CreatePattern,
    pub on_create: Vec<UpdateItem>,
    pub on_match: Vec<UpdateItem>,
}

/// One SET or REMOVE item
#[derive(Debug, Clone)]
pub enum UpdateItem {
    SetProperty { slot: usize, key: String, value: Expr },
    SetLabels { slot: usize, labels: Vec<Label> },
    MergeProperties { slot: usize, value: Expr },
    ReplaceProperties { slot: usize, value: Expr },
    RemoveProperty { slot: usize, key: String },
    RemoveLabels { slot: usize, labels: Vec<Label> },
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
    pub text: String,
}

/// Logical operator tree. Leaves are [`LogicalOp::Argument`], which yields
/// the single row the tree is instantiated with.
#[derive(Debug, Clone)]
pub enum LogicalOp {
    Argument,
    NodeScan {
        input: Box<LogicalOp>,
        slot: usize,
        labels: Vec<Label>,
    },
    IndexSeek {
        input: Box<LogicalOp>,
        slot: usize,
        index: PropertyIndexKey,
        labels: Vec<Label>,
        seek: Seek,
    },
    Expand {
        input: Box<LogicalOp>,
        spec: ExpandSpec,
    },
    Filter {
        input: Box<LogicalOp>,
        predicate: Expr,
        text: String,
    },
    /// No relationship may be bound twice within one MATCH
    UniqueRelationships {
        input: Box<LogicalOp>,
        slots: Vec<usize>,
    },
    /// Runs `inner` per input row; a row without matches survives with
    /// `slots` set to null
    Optional {
        input: Box<LogicalOp>,
        inner: Arc<LogicalOp>,
        slots: Vec<usize>,
    },
    Unwind {
        input: Box<LogicalOp>,
        expr: Expr,
        slot: usize,
    },
    Project {
        input: Box<LogicalOp>,
        items: Vec<(Expr, usize)>,
    },
    Aggregate {
        input: Box<LogicalOp>,
        keys: Vec<(Expr, usize)>,
        aggregates: Vec<AggregateSpec>,
    },
    Distinct {
        input: Box<LogicalOp>,
        slots: Vec<usize>,
    },
    Sort {
        input: Box<LogicalOp>,
        keys: Vec<SortKey>,
    },
    Skip {
        input: Box<LogicalOp>,
        count: usize,
    },
    Limit {
        input: Box<LogicalOp>,
        count: usize,
    },
    Create {
        input: Box<LogicalOp>,
        pattern: CreatePattern,
    },
    Merge {
        input: Box<LogicalOp>,
        spec: Arc<MergeSpec>,
    },
    Update {
        input: Box<LogicalOp>,
        items: Vec<UpdateItem>,
    },
    Delete {
        input: Box<LogicalOp>,
        targets: Vec<Expr>,
        detach: bool,
    },
}

impl LogicalOp {
    fn name(&self) -> &'static str {
        match self {
            LogicalOp::Argument => "Argument",
            LogicalOp::NodeScan { labels, .. } if labels.is_empty() => "AllNodesScan",
            LogicalOp::NodeScan { .. } => "NodeByLabelScan",
            LogicalOp::IndexSeek { seek: Seek::Range { .. }, .. } => "NodeIndexSeekByRange",
            LogicalOp::IndexSeek { .. } => "NodeIndexSeek",
            LogicalOp::Expand { spec, .. } => match (spec.length.is_some(), spec.into) {
                (false, false) => "Expand(All)",
                (false, true) => "Expand(Into)",
                (true, false) => "VarLengthExpand(All)",
                (true, true) => "VarLengthExpand(Into)",
            },
            LogicalOp::Filter { .. } => "Filter",
            LogicalOp::UniqueRelationships { .. } => "RelationshipUniqueness",
            LogicalOp::Optional { .. } => "Optional",
            LogicalOp::Unwind { .. } => "Unwind",
            LogicalOp::Project { .. } => "Projection",
            LogicalOp::Aggregate { keys, .. } if keys.is_empty() => "Aggregation",
            LogicalOp::Aggregate { .. } => "EagerAggregation",
            LogicalOp::Distinct { .. } => "Distinct",
            LogicalOp::Sort { .. } => "Sort",
            LogicalOp::Skip { .. } => "Skip",
            LogicalOp::Limit { .. } => "Limit",
            LogicalOp::Create { .. } => "Create",
            LogicalOp::Merge { .. } => "Merge",
            LogicalOp::Update { .. } => "SetOrRemove",
            LogicalOp::Delete { detach: true, .. } => "DetachDelete",
            LogicalOp::Delete { .. } => "Delete",
        }
    }

    fn input(&self) -> Option<&LogicalOp> {
        match self {
            LogicalOp::Argument => None,
            LogicalOp::NodeScan { input, .. }
            | LogicalOp::IndexSeek { input, .. }
            | LogicalOp::Expand { input, .. }
            | LogicalOp::Filter { input, .. }
            | LogicalOp::UniqueRelationships { input, .. }
            | LogicalOp::Optional { input, .. }
            | LogicalOp::Unwind { input, .. }
            | LogicalOp::Project { input, .. }
            | LogicalOp::Aggregate { input, .. }
            | LogicalOp::Distinct { input, .. }
            | LogicalOp::Sort { input, .. }
            | LogicalOp::Skip { input, .. }
            | LogicalOp::Limit { input, .. }
            | LogicalOp::Create { input, .. }
            | LogicalOp::Merge { input, .. }
            | LogicalOp::Update { input, .. }
            | LogicalOp::Delete { input, .. } => Some(input),
        }
    }
}

/// A planned query
#[derive(Debug, Clone)]
pub struct LogicalPlan {
    pub root: LogicalOp,
    /// Record width covering every slot in the tree
    pub width: usize,
    /// Result column names, empty unless the query ends in RETURN
    pub columns: Vec<String>,
    /// Slots of the result columns
    pub output: Vec<usize>,
    pub slot_names: Vec<String>,
    pub is_write: bool,
}

impl LogicalPlan {
    /// Operator rows for EXPLAIN, root first. Nested plans are indented.
    pub fn explain(&self) -> Vec<(String, String)> {
        let mut rows = Vec::new();
        self.describe(&self.root, 0, &mut rows);
        rows
    }

    fn describe(&self, op: &LogicalOp, depth: usize, rows: &mut Vec<(String, String)>) {
        let mut current = Some(op);
        while let Some(op) = current {
            rows.push((format!("{}{}", "  ".repeat(depth), op.name()), self.details(op)));
            match op {
                LogicalOp::Optional { inner, .. } => self.describe(inner, depth + 1, rows),
                LogicalOp::Merge { spec, .. } => self.describe(&spec.matcher, depth + 1, rows),
                _ => {}
            }
            current = op.input();
        }
    }

    fn name(&self, slot: usize) -> &str {
        self.slot_names.get(slot).map(|s| s.trim_start()).unwrap_or("?")
    }

    fn names(&self, slots: impl IntoIterator<Item = usize>) -> String {
        slots.into_iter().map(|s| self.name(s)).collect::<Vec<_>>().join(", ")
    }

    fn details(&self, op: &LogicalOp) -> String {
        let labels = |labels: &[Label]| labels.iter().map(|l| format!(":{}", l)).collect::<String>();
        match op {
            LogicalOp::Argument | LogicalOp::Optional { .. } | LogicalOp::Merge { .. } => String::new(),
            LogicalOp::NodeScan { slot, labels: l, .. } => format!("{}{}", self.name(*slot), labels(l)),
            LogicalOp::IndexSeek { slot, index, .. } => {
                format!("{}:{}({})", self.name(*slot), index.label, index.property)
            }
            LogicalOp::Expand { spec, .. } => {
                let mut edge = format!("{}{}", self.name(spec.edge), {
                    let types: Vec<&str> = spec.types.iter().map(|t| t.as_str()).collect();
                    if types.is_empty() {
                        String::new()
                    } else {
                        format!(":{}", types.join("|"))
                    }
                });
                if let Some((min, max)) = spec.length {
                    let _ = write!(edge, "*{}..{}", min, max);
                }
                let (left, right) = match spec.direction {
                    Direction::Outgoing => ("-", "->"),
                    Direction::Incoming => ("<-", "-"),
                    Direction::Both => ("-", "-"),
                };
                format!("({}){}[{}]{}({})", self.name(spec.from), left, edge, right, self.name(spec.to))
            }
            LogicalOp::Filter { text, .. } => text.clone(),
            LogicalOp::UniqueRelationships { slots, .. } | LogicalOp::Distinct { slots, .. } => {
                self.names(slots.iter().copied())
            }
            LogicalOp::Unwind { slot, .. } => self.name(*slot).to_string(),
            LogicalOp::Project { items, .. } => self.names(items.iter().map(|(_, s)| *s)),
            LogicalOp::Aggregate { keys, aggregates, .. } => {
                let keys = self.names(keys.iter().map(|(_, s)| *s));
                let aggregates = self.names(aggregates.iter().map(|a| a.slot));
                if keys.is_empty() {
                    aggregates
                } else {
                    format!("{}; {}", keys, aggregates)
                }
            }
            LogicalOp::Sort { keys, .. } => keys
                .iter()
                .map(|k| format!("{} {}", k.text, if k.ascending { "ASC" } else { "DESC" }))
                .collect::<Vec<_>>()
                .join(", "),
            LogicalOp::Skip { count, .. } | LogicalOp::Limit { count, .. } => count.to_string(),
            LogicalOp::Create { pattern, .. } => self.names(
                pattern
                    .nodes
                    .iter()
                    .map(|n| n.slot)
                    .chain(pattern.edges.iter().map(|e| e.slot)),
            ),
            LogicalOp::Update { items, .. } => items
                .iter()
                .map(|item| match item {
                    UpdateItem::SetProperty { slot, key, .. } => format!("SET {}.{}", self.name(*slot), key),
                    UpdateItem::SetLabels { slot, labels: l } => format!("SET {}{}", self.name(*slot), labels(l)),
                    UpdateItem::MergeProperties { slot, .. } => format!("SET {} +=", self.name(*slot)),
                    UpdateItem::ReplaceProperties { slot, .. } => format!("SET {} =", self.name(*slot)),
                    UpdateItem::RemoveProperty { slot, key } => format!("REMOVE {}.{}", self.name(*slot), key),
                    UpdateItem::RemoveLabels { slot, labels: l } => {
                        format!("REMOVE {}{}", self.name(*slot), labels(l))
                    }
                })
                .collect::<Vec<_>>()
                .join(", "),
            LogicalOp::Delete { targets, .. } => format!("{} target(s)", targets.len()),
        }
    }
}

/// Lowers AST expressions against a scope
struct Compiler<'p, 's> {
    params: &'p Params,
    scope: &'s Scope,
}

type Hook<'h> = dyn FnMut(&Expression) -> Option<PlanResult<Expr>> + 'h;

impl Compiler<'_, '_> {
    fn compile(&self, expr: &Expression) -> PlanResult<Expr> {
        self.compile_with(expr, &mut |_| None)
    }

    /// `hook` sees every subexpression first and may take it over
    fn compile_with(&self, expr: &Expression, hook: &mut Hook<'_>) -> PlanResult<Expr> {
        if let Some(result) = hook(expr) {
            return result;
        }
        Ok(match expr {
            Expression::Literal(l) => Expr::Constant(literal(l)),
            Expression::Parameter(name) => Expr::Constant(
                self.params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| PlanError::MissingParameter(name.clone()))?,
            ),
            Expression::Variable(name) => Expr::Slot(lookup(self.scope, name)?),
            Expression::Property { expr, property } => {
                Expr::Property(Box::new(self.compile_with(expr, hook)?), property.clone())
            }
            Expression::Index { expr, index } => Expr::Index(
                Box::new(self.compile_with(expr, hook)?),
                Box::new(self.compile_with(index, hook)?),
            ),
            Expression::HasLabels { expr, labels } => {
                Expr::HasLabels(Box::new(self.compile_with(expr, hook)?), labels.clone())
            }
            Expression::List(items) => Expr::List(
                items
                    .iter()
                    .map(|e| self.compile_with(e, hook))
                    .collect::<PlanResult<_>>()?,
            ),
            Expression::Map(entries) => Expr::Map(
                entries
                    .iter()
                    .map(|(k, e)| Ok((k.clone(), self.compile_with(e, hook)?)))
                    .collect::<PlanResult<_>>()?,
            ),
            Expression::Binary { left, op, right } => {
                let left = self.compile_with(left, hook)?;
                let right = self.compile_with(right, hook)?;
                match (op, right) {
                    (BinaryOp::RegexMatch, Expr::Constant(Value::String(pattern))) => {
                        let regex = compile_regex(&pattern)
                            .map_err(|e| PlanError::Semantic(format!("Invalid Regex: {}", e)))?;
                        Expr::Regex(Box::new(left), Arc::new(regex))
                    }
                    (op, right) => Expr::Binary(Box::new(left), *op, Box::new(right)),
                }
            }
            Expression::Unary { op, expr } => Expr::Unary(*op, Box::new(self.compile_with(expr, hook)?)),
            Expression::Function { name, distinct, args } => {
                if is_aggregate(name) {
                    return semantic(format!("Invalid use of aggregating function {}(...) in this context", name));
                }
                let function = ScalarFunction::from_name(name).ok_or_else(|| PlanError::UnknownFunction(name.clone()))?;
                if *distinct {
                    return semantic(format!("DISTINCT is only allowed in aggregating functions, not in {}()", name));
                }
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    return semantic(format!(
                        "Wrong number of arguments for function {}(): expected {}, got {}",
                        function,
                        if min == max { min.to_string() } else { format!("at least {}", min) },
                        args.len()
                    ));
                }
                Expr::Function(
                    function,
                    args.iter()
                        .map(|e| self.compile_with(e, hook))
                        .collect::<PlanResult<_>>()?,
                )
            }
            Expression::CountStar => {
                return semantic("Invalid use of aggregating function count(*) in this context");
            }
            Expression::Case {
                operand,
                when_clauses,
                else_result,
            } => Expr::Case {
                operand: match operand {
                    Some(e) => Some(Box::new(self.compile_with(e, hook)?)),
                    None => None,
                },
                branches: when_clauses
                    .iter()
                    .map(|(w, t)| Ok((self.compile_with(w, hook)?, self.compile_with(t, hook)?)))
                    .collect::<PlanResult<_>>()?,
                otherwise: match else_result {
                    Some(e) => Some(Box::new(self.compile_with(e, hook)?)),
                    None => None,
                },
            },
        })
    }
}

fn literal(l: &Literal) -> Value {
    match l {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn lookup(scope: &Scope, name: &str) -> PlanResult<usize> {
    scope
        .get(name)
        .copied()
        .ok_or_else(|| PlanError::UndefinedVariable(name.to_string()))
}

/// Variables an expression reads
fn variables(expr: &Expression) -> Vec<&str> {
    let mut found = Vec::new();
    expr.walk(&mut |e| {
        if let Expression::Variable(v) = e {
            found.push(v.as_str());
        }
    });
    found
}

fn contains_aggregate(expr: &Expression) -> bool {
    let mut found = false;
    expr.walk(&mut |e| match e {
        Expression::CountStar => found = true,
        Expression::Function { name, .. } if is_aggregate(name) => found = true,
        _ => {}
    });
    found
}

fn split_conjuncts(expr: &Expression, out: &mut Vec<Expression>) {
    match expr {
        Expression::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            split_conjuncts(left, out);
            split_conjuncts(right, out);
        }
        other => out.push(other.clone()),
    }
}

fn node_variable(node: &NodePattern) -> &str {
    node.variable.as_deref().unwrap_or_default()
}

/// `var.key` for the given variable
fn property_of<'e>(expr: &'e Expression, var: &str) -> Option<&'e str> {
    match expr {
        Expression::Property { expr, property } => match expr.as_ref() {
            Expression::Variable(v) if v == var => Some(property),
            _ => None,
        },
        _ => None,
    }
}

/// Recognizes `var.key <op> value` in either operand order
fn property_comparison<'e>(conjunct: &'e Expression, var: &str) -> Option<(&'e str, BinaryOp, &'e Expression)> {
    let Expression::Binary { left, op, right } = conjunct else {
        return None;
    };
    match op {
        BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if let Some(p) = property_of(left, var) {
                return Some((p, *op, right));
            }
            let flipped = match op {
                BinaryOp::Lt => BinaryOp::Gt,
                BinaryOp::Le => BinaryOp::Ge,
                BinaryOp::Gt => BinaryOp::Lt,
                BinaryOp::Ge => BinaryOp::Le,
                other => *other,
            };
            property_of(right, var).map(|p| (p, flipped, left.as_ref()))
        }
        BinaryOp::In => property_of(left, var).map(|p| (p, BinaryOp::In, right.as_ref())),
        _ => None,
    }
}

enum SeekKind<'e> {
    Equals(&'e Expression),
    In(&'e Expression),
    Range {
        lower: Option<(&'e Expression, bool)>,
        upper: Option<(&'e Expression, bool)>,
    },
}

struct SeekChoice<'e> {
    index: PropertyIndexKey,
    kind: SeekKind<'e>,
}

/// Converts an AST query into a [`LogicalPlan`]
pub struct QueryPlanner<'a> {
    params: &'a Params,
    indexes: FxHashSet<PropertyIndexKey>,
    max_depth: u32,
    slots: Vec<String>,
    anonymous: usize,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(params: &'a Params, indexes: impl IntoIterator<Item = PropertyIndexKey>, max_depth: u32) -> Self {
        Self {
            params,
            indexes: indexes.into_iter().collect(),
            max_depth,
            slots: Vec::new(),
            anonymous: 0,
        }
    }

    pub fn plan(mut self, query: &Query) -> PlanResult<LogicalPlan> {
        let Some(last) = query.clauses.last() else {
            return semantic("Empty query");
        };
        let mut op = LogicalOp::Argument;
        let mut scope = Scope::new();
        let mut columns = Vec::new();
        let mut output = Vec::new();

        for (i, clause) in query.clauses.iter().enumerate() {
            op = match clause {
                Clause::Match(m) if m.optional => self.plan_optional_match(op, m, &mut scope)?,
                Clause::Match(m) => self.plan_match(op, m, &mut scope)?,
                Clause::Unwind(u) => self.plan_unwind(op, u, &mut scope)?,
                Clause::With(w) => {
                    let (projected, new_scope, _, _) = self.plan_projection(op, &w.projection, &scope, false)?;
                    scope = new_scope;
                    match &w.where_clause {
                        Some(predicate) => self.filter(projected, predicate, &scope)?,
                        None => projected,
                    }
                }
                Clause::Return(r) => {
                    if i + 1 != query.clauses.len() {
                        return semantic("RETURN can only be used at the end of the query");
                    }
                    let (projected, _, names, slots) = self.plan_projection(op, &r.projection, &scope, true)?;
                    columns = names;
                    output = slots;
                    projected
                }
                Clause::Create(c) => {
                    let pattern = self.create_pattern(&c.pattern.paths, &mut scope, &Scope::new(), false)?;
                    LogicalOp::Create {
                        input: Box::new(op),
                        pattern,
                    }
                }
                Clause::Merge(m) => self.plan_merge(op, m, &mut scope)?,
                Clause::Set(s) => LogicalOp::Update {
                    input: Box::new(op),
                    items: self.set_items(&s.items, &scope)?,
                },
                Clause::Remove(r) => LogicalOp::Update {
                    input: Box::new(op),
                    items: self.remove_items(&r.items, &scope)?,
                },
                Clause::Delete(d) => {
                    let compiler = self.compiler(&scope);
                    LogicalOp::Delete {
                        input: Box::new(op),
                        targets: d
                            .expressions
                            .iter()
                            .map(|e| compiler.compile(e))
                            .collect::<PlanResult<_>>()?,
                        detach: d.detach,
                    }
                }
            };
        }

        let ending = match last {
            Clause::Match(_) => Some("MATCH"),
            Clause::Unwind(_) => Some("UNWIND"),
            Clause::With(_) => Some("WITH"),
            _ => None,
        };
        if let Some(clause) = ending {
            return semantic(format!(
                "Query cannot conclude with {} (must be a RETURN clause or an update clause)",
                clause
            ));
        }

        Ok(LogicalPlan {
            root: op,
            width: self.slots.len(),
            columns,
            output,
            slot_names: self.slots,
            is_write: query.is_write(),
        })
    }

    fn compiler<'s>(&self, scope: &'s Scope) -> Compiler<'a, 's> {
        Compiler {
            params: self.params,
            scope,
        }
    }

    fn new_slot(&mut self, name: impl Into<String>) -> usize {
        self.slots.push(name.into());
        self.slots.len() - 1
    }

    fn fresh_name(&mut self) -> String {
        self.anonymous += 1;
        format!("  anon_{}", self.anonymous)
    }

    fn filter(&self, input: LogicalOp, predicate: &Expression, scope: &Scope) -> PlanResult<LogicalOp> {
        Ok(LogicalOp::Filter {
            input: Box::new(input),
            predicate: self.compiler(scope).compile(predicate)?,
            text: predicate.to_string(),
        })
    }

    /// Applies every pending conjunct whose variables are all bound, or all
    /// of them when `force` is set
    fn apply_ready(
        &self,
        mut op: LogicalOp,
        scope: &Scope,
        pending: &mut Vec<Expression>,
        force: bool,
    ) -> PlanResult<LogicalOp> {
        let mut remaining = Vec::new();
        for conjunct in pending.drain(..) {
            if force || variables(&conjunct).iter().all(|v| scope.contains_key(*v)) {
                op = self.filter(op, &conjunct, scope)?;
            } else {
                remaining.push(conjunct);
            }
        }
        *pending = remaining;
        Ok(op)
    }

    fn name_anonymous(&mut self, path: &PathPattern) -> PathPattern {
        let mut path = path.clone();
        let mut fill = |var: &mut Option<String>| {
            if var.is_none() {
                *var = Some(self.fresh_name());
            }
        };
        fill(&mut path.start.variable);
        for segment in &mut path.segments {
            fill(&mut segment.edge.variable);
            fill(&mut segment.node.variable);
        }
        path
    }

    fn plan_match(&mut self, input: LogicalOp, clause: &MatchClause, scope: &mut Scope) -> PlanResult<LogicalOp> {
        let mut pending = Vec::new();
        if let Some(predicate) = &clause.where_clause {
            split_conjuncts(predicate, &mut pending);
        }
        let paths: Vec<PathPattern> = clause.pattern.paths.iter().map(|p| self.name_anonymous(p)).collect();
        for path in &paths {
            for node in path.nodes() {
                for (key, value) in &node.properties {
                    pending.push(Expression::binary(
                        Expression::property(node_variable(node), key.clone()),
                        BinaryOp::Eq,
                        value.clone(),
                    ));
                }
            }
        }

        let mut op = input;
        let mut edge_slots = Vec::new();
        for path in &paths {
            op = self.plan_path(op, path, scope, &mut pending, &mut edge_slots)?;
        }
        if edge_slots.len() > 1 {
            op = LogicalOp::UniqueRelationships {
                input: Box::new(op),
                slots: edge_slots,
            };
        }
        self.apply_ready(op, scope, &mut pending, true)
    }

    fn plan_optional_match(
        &mut self,
        input: LogicalOp,
        clause: &MatchClause,
        scope: &mut Scope,
    ) -> PlanResult<LogicalOp> {
        let mut inner_scope = scope.clone();
        let inner = self.plan_match(LogicalOp::Argument, clause, &mut inner_scope)?;
        let slots = inner_scope
            .iter()
            .filter(|(name, _)| !scope.contains_key(*name))
            .map(|(_, slot)| *slot)
            .collect();
        *scope = inner_scope;
        Ok(LogicalOp::Optional {
            input: Box::new(input),
            inner: Arc::new(inner),
            slots,
        })
    }

    fn plan_path(
        &mut self,
        mut op: LogicalOp,
        path: &PathPattern,
        scope: &mut Scope,
        pending: &mut Vec<Expression>,
        edge_slots: &mut Vec<usize>,
    ) -> PlanResult<LogicalOp> {
        let nodes: Vec<&NodePattern> = path.nodes().collect();
        let start = self.choose_start(&nodes, scope, pending);
        let start_node = nodes[start];
        let start_var = node_variable(start_node);

        if scope.contains_key(start_var) {
            if !start_node.labels.is_empty() {
                pending.push(Expression::HasLabels {
                    expr: Box::new(Expression::variable(start_var)),
                    labels: start_node.labels.clone(),
                });
            }
        } else {
            let seek = self
                .choose_seek(start_var, &start_node.labels, scope, pending)
                .map(|choice| self.compile_seek(choice, scope))
                .transpose()?;
            let slot = self.new_slot(start_var);
            op = match seek {
                Some((index, seek)) => LogicalOp::IndexSeek {
                    input: Box::new(op),
                    slot,
                    index,
                    labels: start_node.labels.clone(),
                    seek,
                },
                None => LogicalOp::NodeScan {
                    input: Box::new(op),
                    slot,
                    labels: start_node.labels.clone(),
                },
            };
            scope.insert(start_var.to_string(), slot);
        }
        op = self.apply_ready(op, scope, pending, false)?;

        for i in start..path.segments.len() {
            op = self.plan_expand(op, nodes[i], &path.segments[i].edge, nodes[i + 1], false, scope, edge_slots)?;
            op = self.apply_ready(op, scope, pending, false)?;
        }
        for i in (0..start).rev() {
            op = self.plan_expand(op, nodes[i + 1], &path.segments[i].edge, nodes[i], true, scope, edge_slots)?;
            op = self.apply_ready(op, scope, pending, false)?;
        }
        Ok(op)
    }

    fn choose_start(&self, nodes: &[&NodePattern], scope: &Scope, pending: &[Expression]) -> usize {
        if let Some(i) = nodes.iter().position(|n| scope.contains_key(node_variable(n))) {
            return i;
        }
        nodes
            .iter()
            .position(|n| self.choose_seek(node_variable(n), &n.labels, scope, pending).is_some())
            .unwrap_or(0)
    }

    /// Best index access for `var`: equality, then IN, then a range
    fn choose_seek<'e>(
        &self,
        var: &str,
        labels: &[Label],
        scope: &Scope,
        pending: &'e [Expression],
    ) -> Option<SeekChoice<'e>> {
        let usable = |value: &Expression| variables(value).iter().all(|v| *v != var && scope.contains_key(*v));
        let mut membership: Option<SeekChoice<'e>> = None;
        let mut range: Option<SeekChoice<'e>> = None;
        for label in labels {
            for conjunct in pending {
                let Some((property, op, value)) = property_comparison(conjunct, var) else {
                    continue;
                };
                let index = PropertyIndexKey::new(label.clone(), property);
                if !self.indexes.contains(&index) || !usable(value) {
                    continue;
                }
                match op {
                    BinaryOp::Eq => {
                        return Some(SeekChoice {
                            index,
                            kind: SeekKind::Equals(value),
                        })
                    }
                    BinaryOp::In => {
                        if membership.is_none() {
                            membership = Some(SeekChoice {
                                index,
                                kind: SeekKind::In(value),
                            });
                        }
                    }
                    _ => {
                        let choice = range.get_or_insert_with(|| SeekChoice {
                            index: index.clone(),
                            kind: SeekKind::Range { lower: None, upper: None },
                        });
                        if choice.index != index {
                            continue;
                        }
                        if let SeekKind::Range { lower, upper } = &mut choice.kind {
                            let inclusive = matches!(op, BinaryOp::Le | BinaryOp::Ge);
                            let bound = match op {
                                BinaryOp::Gt | BinaryOp::Ge => lower,
                                _ => upper,
                            };
                            if bound.is_none() {
                                *bound = Some((value, inclusive));
                            }
                        }
                    }
                }
            }
        }
        membership.or(range)
    }

    fn compile_seek(&self, choice: SeekChoice<'_>, scope: &Scope) -> PlanResult<(PropertyIndexKey, Seek)> {
        let compiler = self.compiler(scope);
        let bound = |b: Option<(&Expression, bool)>| -> PlanResult<Option<(Expr, bool)>> {
            b.map(|(e, inclusive)| Ok((compiler.compile(e)?, inclusive))).transpose()
        };
        let seek = match choice.kind {
            SeekKind::Equals(e) => Seek::Equals(compiler.compile(e)?),
            SeekKind::In(e) => Seek::In(compiler.compile(e)?),
            SeekKind::Range { lower, upper } => Seek::Range {
                lower: bound(lower)?,
                upper: bound(upper)?,
            },
        };
        Ok((choice.index, seek))
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_expand(
        &mut self,
        input: LogicalOp,
        from_node: &NodePattern,
        edge: &EdgePattern,
        to_node: &NodePattern,
        reversed: bool,
        scope: &mut Scope,
        edge_slots: &mut Vec<usize>,
    ) -> PlanResult<LogicalOp> {
        let from = lookup(scope, node_variable(from_node))?;
        let edge_properties = {
            let compiler = self.compiler(scope);
            edge.properties
                .iter()
                .map(|(k, e)| Ok((k.clone(), compiler.compile(e)?)))
                .collect::<PlanResult<Vec<_>>>()?
        };

        let edge_var = edge.variable.clone().unwrap_or_default();
        // A relationship variable bound earlier is matched into a fresh
        // slot and then required to be the same relationship
        let rebound = scope.get(&edge_var).copied();
        let edge_slot = match rebound {
            Some(_) => {
                let name = self.fresh_name();
                self.new_slot(name)
            }
            None => {
                let slot = self.new_slot(edge_var.clone());
                scope.insert(edge_var.clone(), slot);
                slot
            }
        };
        edge_slots.push(edge_slot);

        let to_var = node_variable(to_node);
        let (to, into) = match scope.get(to_var) {
            Some(slot) => (*slot, true),
            None => {
                let slot = self.new_slot(to_var);
                scope.insert(to_var.to_string(), slot);
                (slot, false)
            }
        };

        let length = match edge.length {
            None => None,
            Some(l) => {
                let min = l.min.unwrap_or(1);
                let max = match l.max {
                    Some(max) => max,
                    None if min > self.max_depth => {
                        return semantic(format!(
                            "Variable length lower bound {} exceeds the traversal depth limit of {}",
                            min, self.max_depth
                        ));
                    }
                    None => self.max_depth,
                };
                Some((min, max))
            }
        };

        let expand = LogicalOp::Expand {
            input: Box::new(input),
            spec: ExpandSpec {
                from,
                edge: edge_slot,
                to,
                types: edge.types.clone(),
                direction: if reversed { edge.direction.reverse() } else { edge.direction },
                edge_properties,
                to_labels: to_node.labels.clone(),
                length,
                into,
                reverse_path: reversed,
            },
        };

        match rebound {
            Some(bound) => Ok(LogicalOp::Filter {
                input: Box::new(expand),
                predicate: Expr::Binary(Box::new(Expr::Slot(edge_slot)), BinaryOp::Eq, Box::new(Expr::Slot(bound))),
                text: format!("{} = {}", edge_var, edge_var),
            }),
            None => Ok(expand),
        }
    }

    fn plan_unwind(&mut self, input: LogicalOp, clause: &UnwindClause, scope: &mut Scope) -> PlanResult<LogicalOp> {
        if scope.contains_key(&clause.variable) {
            return semantic(format!("Variable `{}` already declared", clause.variable));
        }
        let expr = self.compiler(scope).compile(&clause.expression)?;
        let slot = self.new_slot(clause.variable.clone());
        scope.insert(clause.variable.clone(), slot);
        Ok(LogicalOp::Unwind {
            input: Box::new(input),
            expr,
            slot,
        })
    }

    /// Plans WITH or RETURN. Returns the new operator, the scope after the
    /// projection, and the column names and slots.
    fn plan_projection(
        &mut self,
        input: LogicalOp,
        projection: &Projection,
        scope: &Scope,
        is_return: bool,
    ) -> PlanResult<(LogicalOp, Scope, Vec<String>, Vec<usize>)> {
        let mut items: Vec<(String, Expression)> = Vec::new();
        if projection.star {
            let mut visible: Vec<&String> = scope.keys().filter(|k| !is_hidden(k)).collect();
            visible.sort();
            items.extend(visible.into_iter().map(|name| (name.clone(), Expression::Variable(name.clone()))));
            if items.is_empty() && projection.items.is_empty() {
                return semantic("RETURN * is not allowed when there are no variables in scope");
            }
        }
        for item in &projection.items {
            if !is_return && item.alias.is_none() && !matches!(item.expression, Expression::Variable(_)) {
                return semantic(format!("Expression in WITH must be aliased (use AS): {}", item.text));
            }
            items.push((item.column_name().to_string(), item.expression.clone()));
        }
        let mut seen = FxHashSet::default();
        for (name, _) in &items {
            if !seen.insert(name.as_str()) {
                return semantic(format!(
                    "Multiple result columns with the same name `{}` are not supported",
                    name
                ));
            }
        }

        let aggregating = items.iter().any(|(_, e)| contains_aggregate(e));
        let compiler = self.compiler(scope);
        let mut new_scope = Scope::new();
        let mut output = Vec::new();
        let mut op = input;

        if aggregating {
            let mut keys = Vec::new();
            let mut aggregates = Vec::new();
            let mut post = Vec::new();
            for (name, expr) in &items {
                let slot = if contains_aggregate(expr) {
                    match Self::compile_aggregating(&mut self.slots, &compiler, expr, &mut aggregates)? {
                        Expr::Slot(slot) => {
                            self.slots[slot] = name.clone();
                            slot
                        }
                        other => {
                            let slot = self.new_slot(name.clone());
                            post.push((other, slot));
                            slot
                        }
                    }
                } else {
                    let key = compiler.compile(expr)?;
                    let slot = self.new_slot(name.clone());
                    keys.push((key, slot));
                    slot
                };
                new_scope.insert(name.clone(), slot);
                output.push(slot);
            }
            op = LogicalOp::Aggregate {
                input: Box::new(op),
                keys,
                aggregates,
            };
            if !post.is_empty() {
                op = LogicalOp::Project {
                    input: Box::new(op),
                    items: post,
                };
            }
        } else {
            let mut projections = Vec::new();
            for (name, expr) in &items {
                let slot = match expr {
                    Expression::Variable(v) if v == name => lookup(scope, v)?,
                    _ => {
                        let compiled = compiler.compile(expr)?;
                        let slot = self.new_slot(name.clone());
                        projections.push((compiled, slot));
                        slot
                    }
                };
                new_scope.insert(name.clone(), slot);
                output.push(slot);
            }
            if !projections.is_empty() {
                op = LogicalOp::Project {
                    input: Box::new(op),
                    items: projections,
                };
            }
        }

        if projection.distinct {
            op = LogicalOp::Distinct {
                input: Box::new(op),
                slots: output.clone(),
            };
        }

        if !projection.order_by.is_empty() {
            // Before aggregation or DISTINCT, ORDER BY may still see the
            // variables the projection dropped
            let order_scope = if aggregating || projection.distinct {
                new_scope.clone()
            } else {
                let mut s = scope.clone();
                s.extend(new_scope.iter().map(|(k, v)| (k.clone(), *v)));
                s
            };
            let order_compiler = self.compiler(&order_scope);
            let keys = projection
                .order_by
                .iter()
                .map(|item| {
                    let expr = match items.iter().position(|(_, e)| *e == item.expression) {
                        Some(pos) => Expr::Slot(output[pos]),
                        None => order_compiler.compile(&item.expression)?,
                    };
                    Ok(SortKey {
                        expr,
                        ascending: item.ascending,
                        text: item.expression.to_string(),
                    })
                })
                .collect::<PlanResult<Vec<_>>>()?;
            op = LogicalOp::Sort {
                input: Box::new(op),
                keys,
            };
        }
        if let Some(skip) = &projection.skip {
            op = LogicalOp::Skip {
                input: Box::new(op),
                count: self.constant_count(skip, "SKIP")?,
            };
        }
        if let Some(limit) = &projection.limit {
            op = LogicalOp::Limit {
                input: Box::new(op),
                count: self.constant_count(limit, "LIMIT")?,
            };
        }

        let names = items.into_iter().map(|(name, _)| name).collect();
        Ok((op, new_scope, names, output))
    }

    /// Compiles an item containing aggregates. Each aggregate call gets its
    /// own slot; the rest of the expression reads those slots.
    fn compile_aggregating(
        slots: &mut Vec<String>,
        compiler: &Compiler<'_, '_>,
        expr: &Expression,
        aggregates: &mut Vec<AggregateSpec>,
    ) -> PlanResult<Expr> {
        compiler.compile_with(expr, &mut |e| {
            let (function, distinct, argument) = match e {
                Expression::CountStar => (AggregateFunction::CountStar, false, None),
                Expression::Function { name, distinct, args } if is_aggregate(name) => {
                    let function = AggregateFunction::from_name(name)?;
                    if args.len() != 1 {
                        return Some(semantic(format!(
                            "Wrong number of arguments for function {}(): expected 1, got {}",
                            function,
                            args.len()
                        )));
                    }
                    let argument = match compiler.compile(&args[0]) {
                        Ok(argument) => argument,
                        Err(PlanError::Semantic(m)) if m.starts_with("Invalid use of aggregating") => {
                            return Some(semantic("Can't use aggregate functions inside of aggregate functions."))
                        }
                        Err(err) => return Some(Err(err)),
                    };
                    (function, *distinct, Some(argument))
                }
                Expression::Variable(name) => {
                    return Some(semantic(format!(
                        "Aggregation column contains implicit grouping expressions: `{}` must be projected separately",
                        name
                    )))
                }
                _ => return None,
            };
            slots.push(e.to_string());
            let slot = slots.len() - 1;
            aggregates.push(AggregateSpec {
                function,
                distinct,
                argument,
                slot,
            });
            Some(Ok(Expr::Slot(slot)))
        })
    }

    fn constant_count(&self, expr: &Expression, clause: &str) -> PlanResult<usize> {
        let empty = Scope::new();
        match self.compiler(&empty).compile(expr) {
            Ok(Expr::Constant(Value::Integer(n))) if n >= 0 => Ok(n as usize),
            Ok(_) => semantic(format!(
                "Invalid input. '{}' is not a valid value for {}. Must be a non-negative integer.",
                expr, clause
            )),
            Err(PlanError::UndefinedVariable(_)) => {
                semantic(format!("It is not allowed to refer to variables in {}", clause))
            }
            Err(err) => Err(err),
        }
    }

    /// Plans the elements of CREATE or the creating half of MERGE.
    /// `preassigned` holds slots already chosen for unbound variables.
    fn create_pattern(
        &mut self,
        paths: &[PathPattern],
        scope: &mut Scope,
        preassigned: &Scope,
        merge: bool,
    ) -> PlanResult<CreatePattern> {
        let mut pattern = CreatePattern {
            strict_nulls: merge,
            ..CreatePattern::default()
        };
        for path in paths {
            let mut node_slots = Vec::with_capacity(path.segments.len() + 1);
            for node in path.nodes() {
                if let Some(slot) = node.variable.as_ref().and_then(|v| scope.get(v)) {
                    if !merge && (!node.labels.is_empty() || !node.properties.is_empty()) {
                        return semantic(format!(
                            "Can't create node `{}` with labels or properties here. The variable is already declared in this context",
                            node_variable(node)
                        ));
                    }
                    node_slots.push(*slot);
                    continue;
                }
                let properties = self.create_properties(&node.properties, scope)?;
                let slot = match node.variable.as_ref().and_then(|v| preassigned.get(v)) {
                    Some(slot) => *slot,
                    None => {
                        let name = match &node.variable {
                            Some(v) => v.clone(),
                            None => self.fresh_name(),
                        };
                        self.new_slot(name)
                    }
                };
                if let Some(v) = &node.variable {
                    scope.insert(v.clone(), slot);
                }
                pattern.nodes.push(CreateNode {
                    slot,
                    labels: node.labels.clone(),
                    properties,
                });
                node_slots.push(slot);
            }

            for (i, segment) in path.segments.iter().enumerate() {
                let edge = &segment.edge;
                let clause = if merge { "MERGE" } else { "CREATE" };
                if edge.length.is_some() {
                    return semantic(format!("Variable length relationships cannot be used in {}", clause));
                }
                let [edge_type] = edge.types.as_slice() else {
                    return semantic(format!(
                        "Exactly one relationship type must be specified for {}",
                        clause
                    ));
                };
                let (source, target) = match edge.direction {
                    Direction::Outgoing => (node_slots[i], node_slots[i + 1]),
                    Direction::Incoming => (node_slots[i + 1], node_slots[i]),
                    Direction::Both if merge => (node_slots[i], node_slots[i + 1]),
                    Direction::Both => {
                        return semantic("Only directed relationships are supported in CREATE");
                    }
                };
                if let Some(v) = &edge.variable {
                    if scope.contains_key(v) {
                        return semantic(format!("Variable `{}` already declared", v));
                    }
                }
                let properties = self.create_properties(&edge.properties, scope)?;
                let slot = match edge.variable.as_ref().and_then(|v| preassigned.get(v)) {
                    Some(slot) => *slot,
                    None => {
                        let name = match &edge.variable {
                            Some(v) => v.clone(),
                            None => self.fresh_name(),
                        };
                        self.new_slot(name)
                    }
                };
                if let Some(v) = &edge.variable {
                    scope.insert(v.clone(), slot);
                }
                pattern.edges.push(CreateEdge {
                    slot,
                    source,
                    target,
                    edge_type: edge_type.clone(),
                    properties,
                });
            }
        }
        Ok(pattern)
    }

    fn create_properties(&self, properties: &[(String, Expression)], scope: &Scope) -> PlanResult<Vec<(String, Expr)>> {
        let compiler = self.compiler(scope);
        properties
            .iter()
            .map(|(k, e)| Ok((k.clone(), compiler.compile(e)?)))
            .collect()
    }

    fn plan_merge(&mut self, input: LogicalOp, clause: &MergeClause, scope: &mut Scope) -> PlanResult<LogicalOp> {
        if clause.path.segments.is_empty() {
            if let Some(v) = &clause.path.start.variable {
                if scope.contains_key(v) {
                    return semantic(format!("Variable `{}` already declared", v));
                }
            }
        }
        let matcher_clause = MatchClause {
            pattern: Pattern {
                paths: vec![clause.path.clone()],
            },
            optional: false,
            where_clause: None,
        };
        let mut match_scope = scope.clone();
        let matcher = self.plan_match(LogicalOp::Argument, &matcher_clause, &mut match_scope)?;

        let mut create_scope = scope.clone();
        let create = self.create_pattern(std::slice::from_ref(&clause.path), &mut create_scope, &match_scope, true)?;

        *scope = match_scope;
        let on_create = self.set_items(&clause.on_create, scope)?;
        let on_match = self.set_items(&clause.on_match, scope)?;
        Ok(LogicalOp::Merge {
            input: Box::new(input),
            spec: Arc::new(MergeSpec {
                matcher: Arc::new(matcher),
                create,
                on_create,
                on_match,
            }),
        })
    }

    fn set_items(&self, items: &[SetItem], scope: &Scope) -> PlanResult<Vec<UpdateItem>> {
        let compiler = self.compiler(scope);
        items
            .iter()
            .map(|item| {
                Ok(match item {
                    SetItem::Property {
                        variable,
                        property,
                        value,
                    } => UpdateItem::SetProperty {
                        slot: lookup(scope, variable)?,
                        key: property.clone(),
                        value: compiler.compile(value)?,
                    },
                    SetItem::Labels { variable, labels } => UpdateItem::SetLabels {
                        slot: lookup(scope, variable)?,
                        labels: labels.clone(),
                    },
                    SetItem::MergeMap { variable, value } => UpdateItem::MergeProperties {
                        slot: lookup(scope, variable)?,
                        value: compiler.compile(value)?,
                    },
                    SetItem::ReplaceMap { variable, value } => UpdateItem::ReplaceProperties {
                        slot: lookup(scope, variable)?,
                        value: compiler.compile(value)?,
                    },
                })
            })
            .collect()
    }

    fn remove_items(&self, items: &[RemoveItem], scope: &Scope) -> PlanResult<Vec<UpdateItem>> {
        items
            .iter()
            .map(|item| {
                Ok(match item {
                    RemoveItem::Property { variable, property } => UpdateItem::RemoveProperty {
                        slot: lookup(scope, variable)?,
                        key: property.clone(),
                    },
                    RemoveItem::Labels { variable, labels } => UpdateItem::RemoveLabels {
                        slot: lookup(scope, variable)?,
                        labels: labels.clone(),
                    },
                })
            })
            .collect()
    }
}
