use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Syncdata API",
        version = "1.0.0",
        description = r#"
# Accounting record sync

Replace-sync endpoints for the master, ledger and invoice tables exported by
the IMC1, IMC2, Sysmac, DQ and Planet source systems.

Each table has one route. `POST` replaces the whole table with the submitted
JSON array; `GET` returns what is stored, with a derived `balance` where the
table defines one. `GET /tables` lists every route.

## Partial failures

Ledger and invoice tables are ingested in chunks. Invalid records are
dropped one at a time and reported in `failures` as `{index, reason}`, where
`index` is the position in the submitted array.

Master and roster tables are all-or-nothing: a single invalid record rejects
the request with `400` and the stored rows stay as they were.

## Error Handling

```json
{
  "error": "Bad Request",
  "message": "Bad request: expected a JSON array of records, got an object",
  "request_id": "7f6c1c52-3c1e-4f55-9d8e-1e7c2f0d0b9a",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8000", description = "Local development")
    ),
    tags(
        (name = "sync", description = "Table replace and read endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::sync::list_records,
        crate::handlers::sync::sync_records,
        crate::handlers::sync::list_tables,
        crate::health_check,
        crate::api_status,
    ),
    components(
        schemas(
            crate::handlers::sync::SyncResponse,
            crate::errors::RecordFailure,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
