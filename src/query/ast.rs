//! Abstract syntax tree for Cypher statements
//!
//! A query is an ordered list of clauses. Order is significant: a `WHERE`
//! belongs to the `MATCH` or `WITH` it follows, and each `WITH` starts a
//! new stage with its own scope.

use crate::graph::{Direction, EdgeType, Label};
use std::fmt;

/// A parsed statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    /// `EXPLAIN <query>`: plan only
    Explain(Query),
    /// `CREATE INDEX ON :Label(property)`
    CreateIndex { label: Label, property: String },
    /// `DROP INDEX ON :Label(property)`
    DropIndex { label: Label, property: String },
}

/// Clauses in source order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    /// True if any clause can modify the graph
    pub fn is_write(&self) -> bool {
        self.clauses.iter().any(|c| {
            matches!(
                c,
                Clause::Create(_) | Clause::Merge(_) | Clause::Set(_) | Clause::Remove(_) | Clause::Delete(_)
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match(MatchClause),
    Unwind(UnwindClause),
    With(WithClause),
    Return(ReturnClause),
    Create(CreateClause),
    Merge(MergeClause),
    Set(SetClause),
    Remove(RemoveClause),
    Delete(DeleteClause),
}

/// MATCH clause: `[OPTIONAL] MATCH (n:Person)-[:KNOWS]->(m) [WHERE ...]`
#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    pub pattern: Pattern,
    pub optional: bool,
    /// Filter evaluated against the rows this MATCH produces
    pub where_clause: Option<Expression>,
}

/// Comma-separated path patterns
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub paths: Vec<PathPattern>,
}

/// Path pattern: `(a)-[:R*1..3]->(b)<-[:S]-(c)`
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub start: NodePattern,
    pub segments: Vec<PathSegment>,
}

impl PathPattern {
    /// Node patterns in path order
    pub fn nodes(&self) -> impl Iterator<Item = &NodePattern> {
        std::iter::once(&self.start).chain(self.segments.iter().map(|s| &s.node))
    }
}

/// Relationship plus the node it leads to
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub edge: EdgePattern,
    pub node: NodePattern,
}

/// Node pattern: `(n:Person:Employee {name: $name})`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<Label>,
    /// Inline property constraints, in source order
    pub properties: Vec<(String, Expression)>,
}

/// Relationship pattern: `-[r:KNOWS|FOLLOWS*1..5 {since: 2020}]->`
#[derive(Debug, Clone, PartialEq)]
pub struct EdgePattern {
    pub variable: Option<String>,
    /// Any of these types; empty means any type
    pub types: Vec<EdgeType>,
    pub direction: Direction,
    pub length: Option<LengthPattern>,
    pub properties: Vec<(String, Expression)>,
}

/// Variable length: `*`, `*3`, `*1..5`, `*..5`, `*2..`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPattern {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// UNWIND clause: `UNWIND [1,2,3] AS x`
#[derive(Debug, Clone, PartialEq)]
pub struct UnwindClause {
    pub expression: Expression,
    pub variable: String,
}

/// Shared body of WITH and RETURN
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    pub distinct: bool,
    /// `*`: project every variable in scope
    pub star: bool,
    pub items: Vec<ProjectionItem>,
    pub order_by: Vec<OrderByItem>,
    pub skip: Option<Expression>,
    pub limit: Option<Expression>,
}

/// Projected expression: `n.name AS name`
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expression: Expression,
    pub alias: Option<String>,
    /// Source text, used as the column name when there is no alias
    pub text: String,
}

impl ProjectionItem {
    pub fn column_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.text)
    }
}

/// WITH clause; the WHERE filters the projected rows
#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    pub projection: Projection,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnClause {
    pub projection: Projection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expression: Expression,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateClause {
    pub pattern: Pattern,
}

/// MERGE clause: `MERGE (n:Person {name: 'A'}) ON CREATE SET ... ON MATCH SET ...`
#[derive(Debug, Clone, PartialEq)]
pub struct MergeClause {
    pub path: PathPattern,
    pub on_create: Vec<SetItem>,
    pub on_match: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    pub items: Vec<SetItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// `n.prop = expr`
    Property {
        variable: String,
        property: String,
        value: Expression,
    },
    /// `n:Label1:Label2`
    Labels { variable: String, labels: Vec<Label> },
    /// `n += {map}`
    MergeMap { variable: String, value: Expression },
    /// `n = {map}`
    ReplaceMap { variable: String, value: Expression },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveClause {
    pub items: Vec<RemoveItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveItem {
    Property { variable: String, property: String },
    Labels { variable: String, labels: Vec<Label> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteClause {
    pub expressions: Vec<Expression>,
    pub detach: bool,
}

/// Literal constant
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// `$name`
    Parameter(String),
    Variable(String),
    /// `expr.key`
    Property {
        expr: Box<Expression>,
        property: String,
    },
    /// `expr[index]`
    Index {
        expr: Box<Expression>,
        index: Box<Expression>,
    },
    /// `n:Label1:Label2` used as a predicate
    HasLabels {
        expr: Box<Expression>,
        labels: Vec<Label>,
    },
    List(Vec<Expression>),
    Map(Vec<(String, Expression)>),
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Function {
        name: String,
        distinct: bool,
        args: Vec<Expression>,
    },
    /// `count(*)`
    CountStar,
    Case {
        operand: Option<Box<Expression>>,
        when_clauses: Vec<(Expression, Expression)>,
        else_result: Option<Box<Expression>>,
    },
}

impl Expression {
    pub fn variable(name: impl Into<String>) -> Self {
        Expression::Variable(name.into())
    }

    pub fn property(variable: impl Into<String>, property: impl Into<String>) -> Self {
        Expression::Property {
            expr: Box::new(Expression::Variable(variable.into())),
            property: property.into(),
        }
    }

    pub fn binary(left: Expression, op: BinaryOp, right: Expression) -> Self {
        Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Calls `visit` on this expression and every subexpression
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expression)) {
        visit(self);
        match self {
            Expression::Literal(_) | Expression::Parameter(_) | Expression::Variable(_) | Expression::CountStar => {}
            Expression::Property { expr, .. } | Expression::HasLabels { expr, .. } | Expression::Unary { expr, .. } => {
                expr.walk(visit)
            }
            Expression::Index { expr, index } => {
                expr.walk(visit);
                index.walk(visit);
            }
            Expression::List(items) => items.iter().for_each(|e| e.walk(visit)),
            Expression::Map(entries) => entries.iter().for_each(|(_, e)| e.walk(visit)),
            Expression::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expression::Function { args, .. } => args.iter().for_each(|e| e.walk(visit)),
            Expression::Case {
                operand,
                when_clauses,
                else_result,
            } => {
                if let Some(operand) = operand {
                    operand.walk(visit);
                }
                for (when, then) in when_clauses {
                    when.walk(visit);
                    then.walk(visit);
                }
                if let Some(e) = else_result {
                    e.walk(visit);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    StartsWith,
    EndsWith,
    Contains,
    In,
    RegexMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    IsNull,
    IsNotNull,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("null"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{:.1}", x),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Xor => "XOR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::StartsWith => "STARTS WITH",
            BinaryOp::EndsWith => "ENDS WITH",
            BinaryOp::Contains => "CONTAINS",
            BinaryOp::In => "IN",
            BinaryOp::RegexMatch => "=~",
        })
    }
}

fn write_list<T>(f: &mut fmt::Formatter<'_>, items: &[T], mut item: impl FnMut(&mut fmt::Formatter<'_>, &T) -> fmt::Result) -> fmt::Result {
    for (i, x) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item(f, x)?;
    }
    Ok(())
}

/// Operand of a binary or unary operator, parenthesized when it is itself one
struct Operand<'a>(&'a Expression);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            e @ (Expression::Binary { .. } | Expression::Unary { .. }) => write!(f, "({})", e),
            e => write!(f, "{}", e),
        }
    }
}

/// Renders the expression back to Cypher, as shown by EXPLAIN
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(l) => write!(f, "{}", l),
            Expression::Parameter(name) => write!(f, "${}", name),
            Expression::Variable(name) => f.write_str(name),
            Expression::Property { expr, property } => write!(f, "{}.{}", Operand(expr), property),
            Expression::Index { expr, index } => write!(f, "{}[{}]", Operand(expr), index),
            Expression::HasLabels { expr, labels } => {
                write!(f, "{}", Operand(expr))?;
                labels.iter().try_for_each(|l| write!(f, ":{}", l))
            }
            Expression::List(items) => {
                f.write_str("[")?;
                write_list(f, items, |f, e| write!(f, "{}", e))?;
                f.write_str("]")
            }
            Expression::Map(entries) => {
                f.write_str("{")?;
                write_list(f, entries, |f, (k, e)| write!(f, "{}: {}", k, e))?;
                f.write_str("}")
            }
            Expression::Binary { left, op, right } => write!(f, "{} {} {}", Operand(left), op, Operand(right)),
            Expression::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {}", Operand(expr)),
                UnaryOp::Minus => write!(f, "-{}", Operand(expr)),
                UnaryOp::IsNull => write!(f, "{} IS NULL", Operand(expr)),
                UnaryOp::IsNotNull => write!(f, "{} IS NOT NULL", Operand(expr)),
            },
            Expression::Function { name, distinct, args } => {
                write!(f, "{}(", name)?;
                if *distinct {
                    f.write_str("DISTINCT ")?;
                }
                write_list(f, args, |f, e| write!(f, "{}", e))?;
                f.write_str(")")
            }
            Expression::CountStar => f.write_str("count(*)"),
            Expression::Case {
                operand,
                when_clauses,
                else_result,
            } => {
                f.write_str("CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {}", operand)?;
                }
                for (when, then) in when_clauses {
                    write!(f, " WHEN {} THEN {}", when, then)?;
                }
                if let Some(e) = else_result {
                    write!(f, " ELSE {}", e)?;
                }
                f.write_str(" END")
            }
        }
    }
}
