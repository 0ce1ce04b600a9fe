#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use syncdata_api::{build_router, config::AppConfig, db, AppState};
use tower::ServiceExt;

/// Helper harness for spinning up the full router backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like [`TestApp::new`], with a hook to adjust configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "development".to_string(),
        );
        // Every pooled connection would otherwise open its own empty database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg);
        let router = build_router(state.clone()).expect("router builds");

        Self { router, state }
    }

    /// Send a request against the router.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    /// Send a fully built request, for raw bodies and custom headers.
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = self.request(Method::POST, uri, Some(body)).await;
        read_json(response).await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let response = self.request(Method::GET, uri, None).await;
        read_json(response).await
    }

    /// Stored rows of a table, as served by its GET route.
    pub async fn rows(&self, route: &str) -> Vec<Value> {
        let (status, body) = self.get_json(&format!("/{route}/")).await;
        assert_eq!(status, StatusCode::OK, "GET /{route}/ failed: {body}");
        body.as_array().cloned().expect("list body is an array")
    }
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is json")
    };
    (status, body)
}
