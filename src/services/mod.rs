//! Sync pipeline: normalization, validation, storage and the ingest engine.

pub mod ingest;
pub mod normalizer;
pub mod sync;
pub mod table_store;
pub mod validation;

pub use ingest::{ChunkedIngest, IngestSettings, IngestSummary};
pub use sync::{SyncOutcome, SyncService};

#[cfg(test)]
pub(crate) async fn test_db() -> sea_orm::DatabaseConnection {
    let db = crate::db::establish_connection_with_config(&crate::db::DbConfig::sqlite_in_memory())
        .await
        .expect("in-memory database");
    crate::db::run_migrations(&db).await.expect("migrations");
    db
}
