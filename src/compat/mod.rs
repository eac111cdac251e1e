//! Neo4j compatibility layer
//!
//! Maps results and failures onto the vocabulary Neo4j clients expect:
//! - transactional HTTP request and response shapes
//! - `Neo.*` status codes
//! - `row`/`meta` JSON encoding and element IDs

pub mod error;
pub mod value;

pub use error::Neo4jError;
pub use value::{
    edge_element_id, json_to_value, node_element_id, params_from_json, value_meta, value_to_json,
};

use crate::query::{CancellationToken, QueryEngine, QueryStats, ResultSet};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tracing::debug;

/// Body of `POST /db/{database}/tx/commit`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionRequest {
    #[serde(default)]
    pub statements: Vec<StatementRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementRequest {
    pub statement: String,
    #[serde(default)]
    pub parameters: Map<String, serde_json::Value>,
    #[serde(default, rename = "includeStats")]
    pub include_stats: bool,
}

impl StatementRequest {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Map::new(),
            include_stats: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionResponse {
    pub results: Vec<StatementResult>,
    pub errors: Vec<Neo4jError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub data: Vec<RowData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowData {
    pub row: Vec<serde_json::Value>,
    pub meta: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub contains_updates: bool,
    #[serde(flatten)]
    pub counters: QueryStats,
}

impl From<&QueryStats> for StatsResponse {
    fn from(stats: &QueryStats) -> Self {
        Self {
            contains_updates: stats.contains_updates(),
            counters: stats.clone(),
        }
    }
}

impl StatementResult {
    pub fn from_result(result: &ResultSet, database: &str, include_stats: bool) -> Self {
        Self {
            columns: result.columns.clone(),
            data: result
                .rows
                .iter()
                .map(|row| RowData {
                    row: row.iter().map(value_to_json).collect(),
                    meta: row.iter().map(|v| value_meta(v, database)).collect(),
                })
                .collect(),
            stats: include_stats.then(|| StatsResponse::from(&result.stats)),
        }
    }
}

/// Runs one statement of a transaction request
pub fn run_statement(
    engine: &QueryEngine,
    request: &StatementRequest,
    token: &CancellationToken,
) -> Result<StatementResult, Neo4jError> {
    let params = params_from_json(&request.parameters);
    let result = engine.execute_with(&request.statement, &params, token)?;
    Ok(StatementResult::from_result(&result, engine.database(), request.include_stats))
}

/// Runs the statements in order, stopping at the first failure
pub fn commit(engine: &QueryEngine, request: &TransactionRequest) -> TransactionResponse {
    let mut response = TransactionResponse::default();
    for statement in &request.statements {
        match run_statement(engine, statement, &engine.default_token()) {
            Ok(result) => response.results.push(result),
            Err(err) => {
                debug!("Statement failed with {}: {}", err.code, err.message);
                response.errors.push(err);
                break;
            }
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_commit_stops_at_first_error() {
        let engine = QueryEngine::in_memory();
        let request: TransactionRequest = serde_json::from_value(json!({
            "statements": [
                {"statement": "CREATE (n:Person {name: $name}) RETURN n", "parameters": {"name": "Ada"}, "includeStats": true},
                {"statement": "RETURN nope"},
                {"statement": "CREATE (:Never)"}
            ]
        }))
        .unwrap();

        let response = serde_json::to_value(commit(&engine, &request)).unwrap();
        assert_eq!(response["results"].as_array().unwrap().len(), 1);
        let first = &response["results"][0];
        assert_eq!(first["columns"], json!(["n"]));
        assert_eq!(first["data"][0]["row"], json!([{"name": "Ada"}]));
        assert_eq!(first["data"][0]["meta"][0]["type"], "node");
        assert_eq!(first["stats"]["nodes_created"], 1);
        assert_eq!(first["stats"]["contains_updates"], true);
        assert_eq!(response["errors"][0]["code"], error::SYNTAX_ERROR);

        assert_eq!(engine.storage().node_count().unwrap(), 1);
    }

    #[test]
    fn test_stats_omitted_unless_requested() {
        let engine = QueryEngine::in_memory();
        let result = run_statement(&engine, &StatementRequest::new("RETURN 1 AS x"), &CancellationToken::new()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("stats").is_none());
        assert_eq!(json["data"][0]["row"], json!([1]));
        assert_eq!(json["data"][0]["meta"], json!([null]));
    }
}
