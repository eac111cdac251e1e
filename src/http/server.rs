//! HTTP server exposing the Neo4j-style transactional API

use super::handler::{commit_handler, discovery_handler, health_handler, query_handler};
use crate::config::ServerConfig;
use crate::query::QueryEngine;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Router with every endpoint, ready to serve or to drive in tests
pub fn router(engine: Arc<QueryEngine>) -> Router {
    Router::new()
        .route("/", get(discovery_handler))
        .route("/health", get(health_handler))
        .route("/db/:database/tx/commit", post(commit_handler))
        .route("/query", post(query_handler))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

pub struct HttpServer {
    engine: Arc<QueryEngine>,
    config: ServerConfig,
}

impl HttpServer {
    pub fn new(engine: Arc<QueryEngine>, config: ServerConfig) -> Self {
        Self { engine, config }
    }

    /// Serves until the listener fails
    pub async fn start(&self) -> std::io::Result<()> {
        let app = router(Arc::clone(&self.engine));
        let addr = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("HTTP endpoint listening on http://{}", addr);
        info!("Database '{}' available at /db/{}/tx/commit", self.engine.database(), self.engine.database());

        axum::serve(listener, app).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_commit_endpoint() {
        let app = router(Arc::new(QueryEngine::in_memory()));
        let (status, body) = post(
            app.clone(),
            "/db/neo4j/tx/commit",
            json!({"statements": [{"statement": "CREATE (n:Person {name: 'Ada'}) RETURN n.name AS name"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["data"][0]["row"], json!(["Ada"]));
        assert_eq!(body["errors"], json!([]));

        let (status, body) = post(
            app.clone(),
            "/db/neo4j/tx/commit",
            json!({"statements": [
                {"statement": "CREATE (:Person {name: 'Bob'})", "includeStats": true},
                {"statement": "RETURN nope"},
                {"statement": "CREATE (:Person {name: 'Never'})"}
            ]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["stats"]["nodes_created"], 1);
        assert_eq!(body["errors"][0]["code"], "Neo.ClientError.Statement.SyntaxError");
        let (_, count) = post(
            app.clone(),
            "/query",
            json!({"statement": "MATCH (p:Person) RETURN count(p) AS c"}),
        )
        .await;
        assert_eq!(count["data"], json!([[2]]));

        let (status, body) = post(app, "/db/other/tx/commit", json!({"statements": []})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "Neo.ClientError.Database.DatabaseNotFound");
    }

    #[tokio::test]
    async fn test_query_endpoint_reports_client_errors() {
        let app = router(Arc::new(QueryEngine::in_memory()));
        let (status, body) = post(
            app.clone(),
            "/query",
            json!({"statement": "RETURN $x + 1 AS y", "parameters": {"x": 41}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"columns": ["y"], "data": [[42]]}));

        let (status, body) = post(app, "/query", json!({"statement": "RETURN $x"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "Neo.ClientError.Statement.ParameterMissing");
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(Arc::new(QueryEngine::in_memory()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["backend"], "memory");
    }
}
