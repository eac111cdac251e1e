//! Cypher parser built on pest
//!
//! Turns query text into a [`Statement`]. Parsing is pure: on failure no
//! partial tree is returned, only the position and what was expected.

use crate::graph::{Direction, EdgeType, Label};
use crate::query::ast::*;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "query/cypher.pest"]
struct CypherParser;

static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::xor_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
        .op(Op::infix(Rule::comparison_op, Assoc::Left)
            | Op::infix(Rule::string_op, Assoc::Left)
            | Op::infix(Rule::in_op, Assoc::Left)
            | Op::postfix(Rule::null_check))
        .op(Op::infix(Rule::add_sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_div_mod_op, Assoc::Left))
        .op(Op::infix(Rule::pow_op, Assoc::Left))
        .op(Op::prefix(Rule::neg_op))
        .op(Op::postfix(Rule::property_lookup) | Op::postfix(Rule::index_lookup) | Op::postfix(Rule::label_check))
});

/// Parser errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Invalid input at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
}

impl ParseError {
    fn at(pair: &Pair<'_, Rule>, message: impl Into<String>) -> Self {
        let (line, column) = pair.as_span().start_pos().line_col();
        ParseError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    /// 1-based (line, column) of the error
    pub fn position(&self) -> (usize, usize) {
        match self {
            ParseError::Syntax { line, column, .. } => (*line, *column),
        }
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, column) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        let err = err.renamed_rules(describe_rule);
        ParseError::Syntax {
            line,
            column,
            message: err.variant.message().into_owned(),
        }
    }
}

fn describe_rule(rule: &Rule) -> String {
    let name = format!("{:?}", rule);
    match name.strip_prefix("kw_") {
        Some(keyword) => keyword.to_uppercase(),
        None => name.replace('_', " "),
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse one Cypher statement
pub fn parse_statement(input: &str) -> ParseResult<Statement> {
    let statement = CypherParser::parse(Rule::statement, input)?
        .next()
        .ok_or_else(|| ParseError::Syntax {
            line: 1,
            column: 1,
            message: "empty statement".to_string(),
        })?;

    for inner in statement.into_inner() {
        match inner.as_rule() {
            Rule::query => return Ok(Statement::Query(parse_query(inner)?)),
            Rule::explain_query => {
                let query = child(inner, Rule::query)?;
                return Ok(Statement::Explain(parse_query(query)?));
            }
            Rule::create_index => {
                let (label, property) = parse_index_spec(child(inner, Rule::index_spec)?)?;
                return Ok(Statement::CreateIndex { label, property });
            }
            Rule::drop_index => {
                let (label, property) = parse_index_spec(child(inner, Rule::index_spec)?)?;
                return Ok(Statement::DropIndex { label, property });
            }
            _ => {}
        }
    }
    Err(ParseError::Syntax {
        line: 1,
        column: 1,
        message: "empty statement".to_string(),
    })
}

/// Parse text that must be a query (no schema commands)
pub fn parse_query_text(input: &str) -> ParseResult<Query> {
    match parse_statement(input)? {
        Statement::Query(query) | Statement::Explain(query) => Ok(query),
        _ => Err(ParseError::Syntax {
            line: 1,
            column: 1,
            message: "expected a query".to_string(),
        }),
    }
}

fn child<'i>(pair: Pair<'i, Rule>, rule: Rule) -> ParseResult<Pair<'i, Rule>> {
    let outer = pair.clone();
    pair.into_inner()
        .find(|p| p.as_rule() == rule)
        .ok_or_else(|| ParseError::at(&outer, format!("expected {}", describe_rule(&rule))))
}

/// Resolves a name-bearing rule to its text, stripping backtick escapes
fn symbol(pair: Pair<'_, Rule>) -> String {
    match pair.as_rule() {
        Rule::plain_name => pair.as_str().to_string(),
        Rule::escaped_inner => pair.as_str().replace("``", "`"),
        _ => match pair.clone().into_inner().next() {
            Some(inner) => symbol(inner),
            None => pair.as_str().to_string(),
        },
    }
}

fn parse_index_spec(pair: Pair<'_, Rule>) -> ParseResult<(Label, String)> {
    let mut label = None;
    let mut property = None;
    let mut variables = Vec::new();
    let span = pair.clone();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::label_name => label = Some(Label::new(symbol(inner))),
            Rule::property_key => property = Some(symbol(inner)),
            Rule::identifier => variables.push(symbol(inner)),
            _ => {}
        }
    }
    if variables.len() == 2 && variables[0] != variables[1] {
        return Err(ParseError::at(&span, format!("Variable `{}` not defined", variables[1])));
    }
    match (label, property) {
        (Some(label), Some(property)) => Ok((label, property)),
        _ => Err(ParseError::at(&span, "expected :Label(property)")),
    }
}

fn parse_query(pair: Pair<'_, Rule>) -> ParseResult<Query> {
    let mut clauses = Vec::new();
    for inner in pair.into_inner() {
        let clause = match inner.as_rule() {
            Rule::match_clause => Clause::Match(parse_match_clause(inner)?),
            Rule::unwind_clause => Clause::Unwind(parse_unwind_clause(inner)?),
            Rule::with_clause => Clause::With(parse_with_clause(inner)?),
            Rule::return_clause => Clause::Return(ReturnClause {
                projection: parse_projection_body(child(inner, Rule::projection_body)?)?,
            }),
            Rule::create_clause => Clause::Create(CreateClause {
                pattern: parse_pattern(child(inner, Rule::pattern)?)?,
            }),
            Rule::merge_clause => Clause::Merge(parse_merge_clause(inner)?),
            Rule::set_clause => Clause::Set(SetClause {
                items: parse_set_items(inner)?,
            }),
            Rule::remove_clause => Clause::Remove(parse_remove_clause(inner)?),
            Rule::delete_clause => Clause::Delete(parse_delete_clause(inner)?),
            _ => continue,
        };
        clauses.push(clause);
    }
    Ok(Query { clauses })
}

fn parse_match_clause(pair: Pair<'_, Rule>) -> ParseResult<MatchClause> {
    let mut optional = false;
    let mut pattern = None;
    let mut where_clause = None;
    let span = pair.clone();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::kw_optional => optional = true,
            Rule::pattern => pattern = Some(parse_pattern(inner)?),
            Rule::where_clause => where_clause = Some(parse_expression(child(inner, Rule::expression)?)?),
            _ => {}
        }
    }
    Ok(MatchClause {
        pattern: pattern.ok_or_else(|| ParseError::at(&span, "expected pattern"))?,
        optional,
        where_clause,
    })
}

fn parse_unwind_clause(pair: Pair<'_, Rule>) -> ParseResult<UnwindClause> {
    let span = pair.clone();
    let mut expression = None;
    let mut variable = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => expression = Some(parse_expression(inner)?),
            Rule::identifier => variable = Some(symbol(inner)),
            _ => {}
        }
    }
    match (expression, variable) {
        (Some(expression), Some(variable)) => Ok(UnwindClause { expression, variable }),
        _ => Err(ParseError::at(&span, "expected UNWIND <expression> AS <variable>")),
    }
}

fn parse_with_clause(pair: Pair<'_, Rule>) -> ParseResult<WithClause> {
    let span = pair.clone();
    let mut projection = None;
    let mut where_clause = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::projection_body => projection = Some(parse_projection_body(inner)?),
            Rule::where_clause => where_clause = Some(parse_expression(child(inner, Rule::expression)?)?),
            _ => {}
        }
    }
    Ok(WithClause {
        projection: projection.ok_or_else(|| ParseError::at(&span, "expected projection"))?,
        where_clause,
    })
}

fn parse_projection_body(pair: Pair<'_, Rule>) -> ParseResult<Projection> {
    let mut projection = Projection::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::kw_distinct => projection.distinct = true,
            Rule::projection_items => {
                for item in inner.into_inner() {
                    match item.as_rule() {
                        Rule::star => projection.star = true,
                        Rule::projection_item => projection.items.push(parse_projection_item(item)?),
                        _ => {}
                    }
                }
            }
            Rule::order_by => {
                for item in inner.into_inner().filter(|p| p.as_rule() == Rule::sort_item) {
                    let mut expression = None;
                    let mut ascending = true;
                    for part in item.into_inner() {
                        match part.as_rule() {
                            Rule::expression => expression = Some(parse_expression(part)?),
                            Rule::kw_desc => ascending = false,
                            _ => {}
                        }
                    }
                    if let Some(expression) = expression {
                        projection.order_by.push(OrderByItem { expression, ascending });
                    }
                }
            }
            Rule::skip => projection.skip = Some(parse_expression(child(inner, Rule::expression)?)?),
            Rule::limit => projection.limit = Some(parse_expression(child(inner, Rule::expression)?)?),
            _ => {}
        }
    }
    Ok(projection)
}

fn parse_projection_item(pair: Pair<'_, Rule>) -> ParseResult<ProjectionItem> {
    let span = pair.clone();
    let mut expression = None;
    let mut text = String::new();
    let mut alias = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => {
                text = inner.as_str().trim().to_string();
                expression = Some(parse_expression(inner)?);
            }
            Rule::identifier => alias = Some(symbol(inner)),
            _ => {}
        }
    }
    Ok(ProjectionItem {
        expression: expression.ok_or_else(|| ParseError::at(&span, "expected expression"))?,
        alias,
        text,
    })
}

fn parse_merge_clause(pair: Pair<'_, Rule>) -> ParseResult<MergeClause> {
    let span = pair.clone();
    let mut path = None;
    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::path_pattern => path = Some(parse_path_pattern(inner)?),
            Rule::merge_action => {
                let is_create = inner.clone().into_inner().any(|p| p.as_rule() == Rule::kw_create);
                let items = parse_set_items(inner)?;
                if is_create {
                    on_create.extend(items);
                } else {
                    on_match.extend(items);
                }
            }
            _ => {}
        }
    }
    Ok(MergeClause {
        path: path.ok_or_else(|| ParseError::at(&span, "expected pattern"))?,
        on_create,
        on_match,
    })
}

fn parse_set_items(pair: Pair<'_, Rule>) -> ParseResult<Vec<SetItem>> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::set_item)
        .map(parse_set_item)
        .collect()
}

fn parse_set_item(pair: Pair<'_, Rule>) -> ParseResult<SetItem> {
    let span = pair.clone();
    let item = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::at(&span, "expected SET item"))?;
    let rule = item.as_rule();
    let mut variable = String::new();
    let mut property = String::new();
    let mut labels = Vec::new();
    let mut value = None;
    for part in item.into_inner() {
        match part.as_rule() {
            Rule::identifier => variable = symbol(part),
            Rule::property_key => property = symbol(part),
            Rule::node_labels => labels = parse_labels(part),
            Rule::expression => value = Some(parse_expression(part)?),
            _ => {}
        }
    }
    let parsed = value;
    let value = || parsed.clone().ok_or_else(|| ParseError::at(&span, "expected expression"));
    Ok(match rule {
        Rule::set_property => SetItem::Property {
            variable,
            property,
            value: value()?,
        },
        Rule::set_labels => SetItem::Labels { variable, labels },
        Rule::set_merge_map => SetItem::MergeMap {
            variable,
            value: value()?,
        },
        _ => SetItem::ReplaceMap {
            variable,
            value: value()?,
        },
    })
}

fn parse_remove_clause(pair: Pair<'_, Rule>) -> ParseResult<RemoveClause> {
    let mut items = Vec::new();
    for item in pair.into_inner().filter(|p| p.as_rule() == Rule::remove_item) {
        for part in item.into_inner() {
            let rule = part.as_rule();
            let mut variable = String::new();
            let mut property = String::new();
            let mut labels = Vec::new();
            for inner in part.into_inner() {
                match inner.as_rule() {
                    Rule::identifier => variable = symbol(inner),
                    Rule::property_key => property = symbol(inner),
                    Rule::node_labels => labels = parse_labels(inner),
                    _ => {}
                }
            }
            items.push(match rule {
                Rule::remove_property => RemoveItem::Property { variable, property },
                _ => RemoveItem::Labels { variable, labels },
            });
        }
    }
    Ok(RemoveClause { items })
}

fn parse_delete_clause(pair: Pair<'_, Rule>) -> ParseResult<DeleteClause> {
    let mut detach = false;
    let mut expressions = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::kw_detach => detach = true,
            Rule::expression => expressions.push(parse_expression(inner)?),
            _ => {}
        }
    }
    Ok(DeleteClause { expressions, detach })
}

fn parse_pattern(pair: Pair<'_, Rule>) -> ParseResult<Pattern> {
    let paths = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::path_pattern)
        .map(parse_path_pattern)
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Pattern { paths })
}

fn parse_path_pattern(pair: Pair<'_, Rule>) -> ParseResult<PathPattern> {
    let span = pair.clone();
    let mut inner = pair.into_inner();
    let start = match inner.next() {
        Some(node) => parse_node_pattern(node)?,
        None => return Err(ParseError::at(&span, "expected node pattern")),
    };
    let mut segments = Vec::new();
    while let Some(rel) = inner.next() {
        let edge = parse_relationship_pattern(rel)?;
        let node = match inner.next() {
            Some(node) => parse_node_pattern(node)?,
            None => return Err(ParseError::at(&span, "expected node pattern after relationship")),
        };
        segments.push(PathSegment { edge, node });
    }
    Ok(PathPattern { start, segments })
}

fn parse_node_pattern(pair: Pair<'_, Rule>) -> ParseResult<NodePattern> {
    let mut node = NodePattern::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::identifier => node.variable = Some(symbol(inner)),
            Rule::node_labels => node.labels = parse_labels(inner),
            Rule::map_literal => node.properties = parse_map_entries(inner)?,
            _ => {}
        }
    }
    Ok(node)
}

fn parse_labels(pair: Pair<'_, Rule>) -> Vec<Label> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::label_name)
        .map(|p| Label::new(symbol(p)))
        .collect()
}

fn parse_relationship_pattern(pair: Pair<'_, Rule>) -> ParseResult<EdgePattern> {
    let mut left = false;
    let mut right = false;
    let mut edge = EdgePattern {
        variable: None,
        types: Vec::new(),
        direction: Direction::Both,
        length: None,
        properties: Vec::new(),
    };
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::left_arrow => left = true,
            Rule::right_arrow => right = true,
            Rule::relationship_detail => {
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::identifier => edge.variable = Some(symbol(part)),
                        Rule::relationship_types => {
                            edge.types = part
                                .into_inner()
                                .filter(|p| p.as_rule() == Rule::rel_type_name)
                                .map(|p| EdgeType::new(symbol(p)))
                                .collect();
                        }
                        Rule::range_spec => edge.length = Some(parse_range_spec(part)?),
                        Rule::map_literal => edge.properties = parse_map_entries(part)?,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    edge.direction = match (left, right) {
        (false, true) => Direction::Outgoing,
        (true, false) => Direction::Incoming,
        _ => Direction::Both,
    };
    Ok(edge)
}

fn parse_range_spec(pair: Pair<'_, Rule>) -> ParseResult<LengthPattern> {
    let mut length = LengthPattern { min: None, max: None };
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::range_exact => {
                let n = parse_bound(&inner)?;
                length = LengthPattern {
                    min: Some(n),
                    max: Some(n),
                };
            }
            Rule::range_bounds => {
                for bound in inner.into_inner() {
                    match bound.as_rule() {
                        Rule::range_lower => length.min = Some(parse_bound(&bound)?),
                        Rule::range_upper => length.max = Some(parse_bound(&bound)?),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(length)
}

fn parse_bound(pair: &Pair<'_, Rule>) -> ParseResult<u32> {
    pair.as_str()
        .parse()
        .map_err(|_| ParseError::at(pair, format!("invalid path length bound '{}'", pair.as_str())))
}

fn parse_map_entries(pair: Pair<'_, Rule>) -> ParseResult<Vec<(String, Expression)>> {
    let mut entries = Vec::new();
    for entry in pair.into_inner().filter(|p| p.as_rule() == Rule::map_entry) {
        let span = entry.clone();
        let mut key = None;
        let mut value = None;
        for part in entry.into_inner() {
            match part.as_rule() {
                Rule::property_key => key = Some(symbol(part)),
                Rule::expression => value = Some(parse_expression(part)?),
                _ => {}
            }
        }
        match (key, value) {
            (Some(k), Some(v)) => entries.push((k, v)),
            _ => return Err(ParseError::at(&span, "expected key: value")),
        }
    }
    Ok(entries)
}

fn parse_expression(pair: Pair<'_, Rule>) -> ParseResult<Expression> {
    PRATT_PARSER
        .map_primary(parse_atom)
        .map_prefix(|op, rhs| {
            let rhs = rhs?;
            Ok(match op.as_rule() {
                Rule::not_op => Expression::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(rhs),
                },
                _ => match rhs {
                    Expression::Literal(Literal::Integer(i)) => Expression::Literal(Literal::Integer(-i)),
                    Expression::Literal(Literal::Float(f)) => Expression::Literal(Literal::Float(-f)),
                    other => Expression::Unary {
                        op: UnaryOp::Minus,
                        expr: Box::new(other),
                    },
                },
            })
        })
        .map_postfix(|lhs, op| {
            let lhs = Box::new(lhs?);
            Ok(match op.as_rule() {
                Rule::null_check => {
                    let negated = op.into_inner().any(|p| p.as_rule() == Rule::kw_not);
                    Expression::Unary {
                        op: if negated { UnaryOp::IsNotNull } else { UnaryOp::IsNull },
                        expr: lhs,
                    }
                }
                Rule::property_lookup => Expression::Property {
                    expr: lhs,
                    property: symbol(child(op, Rule::property_key)?),
                },
                Rule::index_lookup => Expression::Index {
                    expr: lhs,
                    index: Box::new(parse_expression(child(op, Rule::expression)?)?),
                },
                _ => Expression::HasLabels {
                    expr: lhs,
                    labels: parse_labels(child(op, Rule::node_labels)?),
                },
            })
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or_op => BinaryOp::Or,
                Rule::xor_op => BinaryOp::Xor,
                Rule::and_op => BinaryOp::And,
                Rule::in_op => BinaryOp::In,
                Rule::pow_op => BinaryOp::Pow,
                Rule::string_op => match op.into_inner().next().map(|p| p.as_rule()) {
                    Some(Rule::kw_starts) => BinaryOp::StartsWith,
                    Some(Rule::kw_ends) => BinaryOp::EndsWith,
                    _ => BinaryOp::Contains,
                },
                _ => match op.as_str() {
                    "=" => BinaryOp::Eq,
                    "<>" | "!=" => BinaryOp::Ne,
                    "<" => BinaryOp::Lt,
                    "<=" => BinaryOp::Le,
                    ">" => BinaryOp::Gt,
                    ">=" => BinaryOp::Ge,
                    "=~" => BinaryOp::RegexMatch,
                    "+" => BinaryOp::Add,
                    "-" => BinaryOp::Sub,
                    "*" => BinaryOp::Mul,
                    "/" => BinaryOp::Div,
                    "%" => BinaryOp::Mod,
                    other => return Err(ParseError::at(&op, format!("unknown operator '{}'", other))),
                },
            };
            Ok(Expression::binary(lhs?, op, rhs?))
        })
        .parse(pair.into_inner())
}

fn parse_atom(pair: Pair<'_, Rule>) -> ParseResult<Expression> {
    Ok(match pair.as_rule() {
        Rule::null_lit => Expression::Literal(Literal::Null),
        Rule::true_lit => Expression::Literal(Literal::Boolean(true)),
        Rule::false_lit => Expression::Literal(Literal::Boolean(false)),
        Rule::integer_lit => Expression::Literal(Literal::Integer(parse_integer(&pair)?)),
        Rule::float_lit => {
            let value = pair
                .as_str()
                .parse::<f64>()
                .map_err(|_| ParseError::at(&pair, format!("invalid float '{}'", pair.as_str())))?;
            Expression::Literal(Literal::Float(value))
        }
        Rule::string_lit => {
            let raw = pair.clone().into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Expression::Literal(Literal::String(unescape(raw, &pair)?))
        }
        Rule::parameter => Expression::Parameter(symbol(child(pair, Rule::symbolic_name)?)),
        Rule::count_star => Expression::CountStar,
        Rule::function_call => {
            let mut name = String::new();
            let mut distinct = false;
            let mut args = Vec::new();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::function_name => name = inner.as_str().to_string(),
                    Rule::kw_distinct => distinct = true,
                    Rule::expression => args.push(parse_expression(inner)?),
                    _ => {}
                }
            }
            Expression::Function { name, distinct, args }
        }
        Rule::list_literal => Expression::List(
            pair.into_inner()
                .filter(|p| p.as_rule() == Rule::expression)
                .map(parse_expression)
                .collect::<ParseResult<Vec<_>>>()?,
        ),
        Rule::map_literal => Expression::Map(parse_map_entries(pair)?),
        Rule::parenthesized => parse_expression(child(pair, Rule::expression)?)?,
        Rule::variable => Expression::Variable(symbol(pair)),
        Rule::case_expr => parse_case(pair)?,
        _ => return Err(ParseError::at(&pair, format!("unexpected {}", describe_rule(&pair.as_rule())))),
    })
}

fn parse_case(pair: Pair<'_, Rule>) -> ParseResult<Expression> {
    let mut operand = None;
    let mut when_clauses = Vec::new();
    let mut else_result = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::case_operand => operand = Some(Box::new(parse_expression(child(inner, Rule::expression)?)?)),
            Rule::case_when => {
                let span = inner.clone();
                let mut parts = inner.into_inner().filter(|p| p.as_rule() == Rule::expression);
                match (parts.next(), parts.next()) {
                    (Some(when), Some(then)) => when_clauses.push((parse_expression(when)?, parse_expression(then)?)),
                    _ => return Err(ParseError::at(&span, "expected WHEN ... THEN ...")),
                }
            }
            Rule::case_else => else_result = Some(Box::new(parse_expression(child(inner, Rule::expression)?)?)),
            _ => {}
        }
    }
    Ok(Expression::Case {
        operand,
        when_clauses,
        else_result,
    })
}

fn parse_integer(pair: &Pair<'_, Rule>) -> ParseResult<i64> {
    let text = pair.as_str();
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse::<i64>(),
    };
    parsed.map_err(|_| ParseError::at(pair, format!("integer is too large: {}", text)))
}

fn unescape(raw: &str, pair: &Pair<'_, Rule>) -> ParseResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let ch = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ParseError::at(pair, format!("invalid unicode escape \\u{}", hex)))?;
                out.push(ch);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Ok(out)
}
