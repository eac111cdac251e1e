//! HTTP handlers for the transactional endpoint

use crate::compat::{self, error, Neo4jError, StatementRequest, TransactionRequest, TransactionResponse};
use crate::query::QueryEngine;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Map};
use std::sync::Arc;
use tracing::{debug, warn};

pub type AppState = Arc<QueryEngine>;

/// Body of `POST /query`
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub statement: String,
    #[serde(default)]
    pub parameters: Map<String, serde_json::Value>,
}

/// Runs `request` on a blocking worker so long queries never stall the runtime
async fn run_blocking(engine: AppState, request: StatementRequest) -> Result<compat::StatementResult, Neo4jError> {
    let token = engine.default_token();
    tokio::task::spawn_blocking(move || compat::run_statement(&engine, &request, &token))
        .await
        .unwrap_or_else(|e| {
            warn!("Query worker failed: {}", e);
            Err(Neo4jError::new(error::UNKNOWN_ERROR, e.to_string()))
        })
}

fn unknown_database(name: &str) -> Neo4jError {
    Neo4jError::new(
        "Neo.ClientError.Database.DatabaseNotFound",
        format!("Database does not exist. Database name: '{}'.", name),
    )
}

/// `POST /db/{database}/tx/commit`
pub async fn commit_handler(
    State(engine): State<AppState>,
    Path(database): Path<String>,
    Json(request): Json<TransactionRequest>,
) -> impl IntoResponse {
    if database != engine.database() {
        let response = TransactionResponse {
            results: Vec::new(),
            errors: vec![unknown_database(&database)],
        };
        return (StatusCode::NOT_FOUND, Json(response));
    }

    debug!("Committing {} statement(s)", request.statements.len());
    let response = tokio::task::spawn_blocking(move || compat::commit(&engine, &request))
        .await
        .unwrap_or_else(|e| {
            warn!("Transaction worker failed: {}", e);
            TransactionResponse {
                results: Vec::new(),
                errors: vec![Neo4jError::new(error::UNKNOWN_ERROR, e.to_string())],
            }
        });
    // Neo4j reports statement failures inside a 200 response
    (StatusCode::OK, Json(response))
}

/// `POST /query`: one statement, plain `{columns, data}` result
pub async fn query_handler(State(engine): State<AppState>, Json(request): Json<QueryRequest>) -> impl IntoResponse {
    let statement = StatementRequest {
        statement: request.statement,
        parameters: request.parameters,
        include_stats: false,
    };
    match run_blocking(engine, statement).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "columns": result.columns,
                "data": result.data.into_iter().map(|d| d.row).collect::<Vec<_>>(),
            })),
        ),
        Err(err) => {
            let status = if err.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(json!({ "errors": [err] })))
        }
    }
}

/// `GET /`: discovery document
pub async fn discovery_handler(State(engine): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "transaction": "/db/{databaseName}/tx",
        "neo4j_version": crate::NEO4J_VERSION,
        "neo4j_edition": "community",
        "default_database": engine.database(),
        "graphcore_version": crate::VERSION,
    }))
}

/// `GET /health`
pub async fn health_handler(State(engine): State<AppState>) -> impl IntoResponse {
    let storage = engine.storage();
    match (storage.node_count(), storage.edge_count()) {
        (Ok(nodes), Ok(edges)) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "backend": storage.name(),
                "nodes": nodes,
                "edges": edges,
            })),
        ),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": e.to_string() })),
            )
        }
    }
}
