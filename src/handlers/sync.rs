use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Response,
    routing::{get, MethodRouter},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use utoipa::ToSchema;

use super::common::{created_response, success_response};
use crate::{
    entities::{registry, IngestMode, TableSchema},
    errors::{RecordFailure, ServiceError},
    services::{IngestSummary, SyncOutcome},
    AppState,
};

/// Body returned by every successful sync POST.
///
/// Chunked tables (ledgers, invoice masters) always report counts; master
/// and roster tables only carry `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "message": "IMC-1 ledger sync completed",
    "processed_count": 499,
    "total_count": 500,
    "failed_count": 1,
    "failures": [{"index": 3, "reason": "missing required field `code`"}]
}))]
pub struct SyncResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecordFailure>,
}

impl SyncResponse {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            processed_count: None,
            total_count: None,
            failed_count: None,
            failures: Vec::new(),
        }
    }

    fn summary(message: impl Into<String>, summary: IngestSummary) -> Self {
        Self {
            message: message.into(),
            processed_count: Some(summary.processed_count),
            total_count: Some(summary.total_count),
            failed_count: Some(summary.failed_count),
            failures: summary.failures,
        }
    }
}

/// List every stored record of a table
#[utoipa::path(
    get,
    path = "/{table}/",
    summary = "List records",
    description = "Returns the full table ordered by id, with the derived `balance` where the table defines one. Roster codes are decoded to labels.",
    params(
        ("table" = String, Path, description = "Table route, e.g. `imc1-ledgers`; see GET /tables"),
    ),
    responses(
        (status = 200, description = "Stored records", body = Vec<serde_json::Value>,
            headers(("x-request-id" = String, description = "Unique request id"))
        ),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "sync"
)]
pub async fn list_records(
    State(state): State<AppState>,
    schema: &'static TableSchema,
) -> Result<Response, ServiceError> {
    let rows = state.sync.list(schema).await?;
    Ok(success_response(rows))
}

/// Replace the contents of a table
#[utoipa::path(
    post,
    path = "/{table}/",
    summary = "Replace records",
    description = "Deletes every stored row and inserts the submitted records. Ledger and invoice tables drop invalid records individually; master and roster tables reject the whole payload.",
    params(
        ("table" = String, Path, description = "Table route, e.g. `imc1-ledgers`; see GET /tables"),
    ),
    request_body = Vec<serde_json::Value>,
    responses(
        (status = 200, description = "Empty payload, table left untouched", body = SyncResponse),
        (status = 201, description = "Records stored", body = SyncResponse,
            headers(("x-request-id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Payload is not a JSON array, is malformed, or holds invalid master records", body = crate::errors::ErrorResponse),
        (status = 413, description = "Request body too large", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "sync"
)]
pub async fn sync_records(
    State(state): State<AppState>,
    schema: &'static TableSchema,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let Json(payload) = payload.map_err(map_rejection)?;

    let response = match state.sync.replace(schema, payload).await? {
        SyncOutcome::NoOp => match schema.ingest_mode() {
            IngestMode::Chunked => success_response(SyncResponse::summary(
                "No records provided",
                IngestSummary::default(),
            )),
            IngestMode::WholePayload => success_response(SyncResponse::message("No records provided")),
        },
        SyncOutcome::Ingested(summary) => {
            info!(
                table = schema.table_name,
                processed = summary.processed_count,
                failed = summary.failed_count,
                "sync completed"
            );
            created_response(SyncResponse::summary(
                format!("{} sync completed", schema.display_name),
                summary,
            ))
        }
        SyncOutcome::Replaced { saved } => {
            info!(table = schema.table_name, saved, "records saved");
            created_response(SyncResponse::message(format!(
                "{} records saved",
                schema.display_name
            )))
        }
    };
    Ok(response)
}

/// Returns the table registry
#[utoipa::path(
    get,
    path = "/tables",
    summary = "List synchronized tables",
    responses(
        (status = 200, description = "Registry entries with their routes and fields", body = Vec<serde_json::Value>),
    ),
    tag = "sync"
)]
pub async fn list_tables() -> Response {
    success_response(registry())
}

fn map_rejection(rejection: JsonRejection) -> ServiceError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(rejection.body_text())
    } else {
        ServiceError::BadRequest(rejection.body_text())
    }
}

fn table_routes(schema: &'static TableSchema) -> MethodRouter<AppState> {
    get(move |state: State<AppState>| list_records(state, schema)).post(
        move |state: State<AppState>, payload: Result<Json<Value>, JsonRejection>| {
            sync_records(state, schema, payload)
        },
    )
}

/// One GET/POST pair per registry table, reachable with and without the
/// trailing slash.
pub fn sync_routes() -> Router<AppState> {
    registry()
        .iter()
        .fold(Router::new(), |router, schema| {
            let routes = table_routes(schema);
            router
                .route(&format!("/{}", schema.route), routes.clone())
                .route(&format!("/{}/", schema.route), routes)
        })
        .route("/tables", get(list_tables))
}
