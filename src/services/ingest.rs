//! Chunked bulk ingest with per-record fallback.
//!
//! Records are processed in fixed-size chunks inside the caller's
//! transaction. A chunk that passes batch validation is bulk inserted under a
//! savepoint; when validation or the bulk insert fails, the chunk is replayed
//! one record at a time, each under its own savepoint, so a single bad record
//! only costs itself.

use metrics::counter;
use sea_orm::{DatabaseTransaction, DbErr};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::{
    config::SyncConfig,
    entities::TableSchema,
    errors::RecordFailure,
    services::{
        normalizer::{normalize_record, NormalizedRecord},
        table_store::TableStore,
        validation::{validate_batch, validate_record},
    },
};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_REPORTED_FAILURES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub insert_batch_size: usize,
    pub max_reported_failures: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            max_reported_failures: DEFAULT_MAX_REPORTED_FAILURES,
        }
    }
}

impl From<&SyncConfig> for IngestSettings {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size.max(1),
            insert_batch_size: cfg.insert_batch_size.max(1),
            max_reported_failures: cfg.max_reported_failures,
        }
    }
}

/// Outcome of one chunked ingest run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct IngestSummary {
    pub total_count: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    /// First failures in submission order, capped by configuration
    pub failures: Vec<RecordFailure>,
    #[serde(skip)]
    pub fallback_chunks: usize,
}

impl IngestSummary {
    fn new(total_count: usize) -> Self {
        Self {
            total_count,
            ..Default::default()
        }
    }

    fn record_failure(&mut self, failure: RecordFailure, cap: usize) {
        self.failed_count += 1;
        if self.failures.len() < cap {
            self.failures.push(failure);
        }
    }
}

enum ChunkPath {
    Bulk,
    Fallback(&'static str),
}

pub struct ChunkedIngest {
    store: TableStore,
    settings: IngestSettings,
}

impl ChunkedIngest {
    pub fn new(schema: &'static TableSchema, settings: IngestSettings) -> Self {
        Self {
            store: TableStore::new(schema),
            settings,
        }
    }

    fn schema(&self) -> &'static TableSchema {
        self.store.schema()
    }

    /// Replaces the table contents with the valid subset of `records`.
    ///
    /// Any `Err` leaves `txn` in an unknown state; the caller must roll it back.
    #[instrument(skip(self, txn, records), fields(table = self.schema().table_name, total = records.len()))]
    pub async fn run(
        &self,
        txn: &DatabaseTransaction,
        records: &[Value],
    ) -> Result<IngestSummary, DbErr> {
        let deleted = self.store.delete_all(txn).await?;
        debug!(deleted, "cleared previous rows");

        let mut summary = IngestSummary::new(records.len());
        for (chunk_no, chunk) in records.chunks(self.settings.chunk_size.max(1)).enumerate() {
            let offset = chunk_no * self.settings.chunk_size.max(1);
            self.process_chunk(txn, offset, chunk, &mut summary).await?;
        }

        Ok(summary)
    }

    async fn process_chunk(
        &self,
        txn: &DatabaseTransaction,
        offset: usize,
        chunk: &[Value],
        summary: &mut IngestSummary,
    ) -> Result<(), DbErr> {
        let schema = self.schema();
        let mut normalized = Vec::with_capacity(chunk.len());
        for (position, raw) in chunk.iter().enumerate() {
            match normalize_record(schema, offset + position, raw) {
                Ok(record) => normalized.push(record),
                Err(failure) => {
                    warn!(index = failure.index, reason = %failure.reason, "record rejected during normalization");
                    summary.record_failure(failure, self.settings.max_reported_failures);
                }
            }
        }

        if normalized.is_empty() {
            return Ok(());
        }

        match self.try_bulk(txn, &normalized).await? {
            ChunkPath::Bulk => {
                summary.processed_count += normalized.len();
                Ok(())
            }
            ChunkPath::Fallback(cause) => {
                debug!(offset, size = normalized.len(), cause, "falling back to per-record inserts");
                counter!("syncdata.chunk.fallback", 1, "table" => schema.table_name);
                summary.fallback_chunks += 1;
                self.insert_individually(txn, &normalized, summary).await
            }
        }
    }

    async fn try_bulk(
        &self,
        txn: &DatabaseTransaction,
        records: &[NormalizedRecord],
    ) -> Result<ChunkPath, DbErr> {
        if let Err(failures) = validate_batch(self.schema(), records) {
            debug!(invalid = failures.len(), "batch validation failed");
            return Ok(ChunkPath::Fallback("validation"));
        }

        match self
            .store
            .insert_rows_isolated(txn, records, self.settings.insert_batch_size)
            .await?
        {
            Ok(_) => Ok(ChunkPath::Bulk),
            Err(err) => {
                warn!(error = %err, "bulk insert failed");
                Ok(ChunkPath::Fallback("storage"))
            }
        }
    }

    async fn insert_individually(
        &self,
        txn: &DatabaseTransaction,
        records: &[NormalizedRecord],
        summary: &mut IngestSummary,
    ) -> Result<(), DbErr> {
        let cap = self.settings.max_reported_failures;
        for record in records {
            if let Err(failure) = validate_record(self.schema(), record) {
                warn!(index = failure.index, reason = %failure.reason, "record failed validation");
                summary.record_failure(failure, cap);
                continue;
            }

            match self
                .store
                .insert_rows_isolated(txn, std::slice::from_ref(record), 1)
                .await?
            {
                Ok(_) => summary.processed_count += 1,
                Err(err) => {
                    warn!(index = record.index, error = %err, "record failed to insert");
                    summary.record_failure(RecordFailure::new(record.index, err.to_string()), cap);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{find, EntityTag, TableRole},
        services::test_db,
    };
    use sea_orm::TransactionTrait;
    use serde_json::json;

    fn settings(chunk_size: usize) -> IngestSettings {
        IngestSettings {
            chunk_size,
            insert_batch_size: 3,
            max_reported_failures: 2,
        }
    }

    fn ledger() -> &'static TableSchema {
        find(EntityTag::Imc2, TableRole::Ledger).unwrap()
    }

    #[tokio::test]
    async fn clean_chunks_take_the_bulk_path() {
        let db = test_db().await;
        let records: Vec<_> = (0..7).map(|i| json!({"code": format!("L{i}")})).collect();

        let txn = db.begin().await.unwrap();
        let summary = ChunkedIngest::new(ledger(), settings(3))
            .run(&txn, &records)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(summary.total_count, 7);
        assert_eq!(summary.processed_count, 7);
        assert_eq!(summary.failed_count, 0);
        assert_eq!(summary.fallback_chunks, 0);
        assert_eq!(TableStore::new(ledger()).count(&db).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn duplicate_across_chunks_fails_alone() {
        let db = test_db().await;
        let records = vec![
            json!({"code": "A"}),
            json!({"code": "B"}),
            json!({"code": "A"}),
            json!({"code": "C"}),
        ];

        let txn = db.begin().await.unwrap();
        let summary = ChunkedIngest::new(ledger(), settings(2))
            .run(&txn, &records)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(summary.processed_count, 3);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.failures[0].index, 2);
        assert_eq!(summary.fallback_chunks, 1);
    }

    #[tokio::test]
    async fn failure_report_is_capped_but_count_is_not() {
        let db = test_db().await;
        let records = vec![json!({}), json!(1), json!({"code": ""}), json!({"code": "ok"})];

        let txn = db.begin().await.unwrap();
        let summary = ChunkedIngest::new(ledger(), settings(10))
            .run(&txn, &records)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(summary.failed_count, 3);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.processed_count, 1);
    }

    #[tokio::test]
    async fn previous_rows_are_replaced() {
        let db = test_db().await;
        let engine = ChunkedIngest::new(ledger(), settings(10));

        let txn = db.begin().await.unwrap();
        engine.run(&txn, &[json!({"code": "OLD"})]).await.unwrap();
        txn.commit().await.unwrap();

        let txn = db.begin().await.unwrap();
        engine.run(&txn, &[json!({"code": "NEW"})]).await.unwrap();
        txn.commit().await.unwrap();

        let rows = TableStore::new(ledger()).fetch_all(&db).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].value("code").and_then(|v| v.as_text()),
            Some("NEW")
        );
    }
}
