use std::{sync::Arc, time::Instant};

use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde_json::{Map, Number, Value};
use tracing::{error, info, instrument, warn};

use crate::{
    entities::{IngestMode, TableSchema, ID_COLUMN, SYNCED_AT_COLUMN},
    errors::{RecordFailure, ServiceError},
    services::{
        ingest::{ChunkedIngest, IngestSettings, IngestSummary},
        normalizer::{normalize_record, FieldValue, NormalizedRecord},
        table_store::{StoredRow, TableStore},
        validation::validate_batch,
    },
};

/// Invalid raw records echoed to the log when a whole payload is rejected.
const LOGGED_INVALID_RECORDS: usize = 3;

/// Result of a replace request
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Empty payload; the table was left untouched.
    NoOp,
    /// Chunked ingest finished, possibly with per-record failures.
    Ingested(IngestSummary),
    /// Whole payload validated and stored.
    Replaced { saved: usize },
}

/// Replace-sync and read operations over registry tables
#[derive(Clone)]
pub struct SyncService {
    db: Arc<DatabaseConnection>,
    settings: IngestSettings,
}

impl SyncService {
    pub fn new(db: Arc<DatabaseConnection>, settings: IngestSettings) -> Self {
        Self { db, settings }
    }

    /// Replaces the contents of `schema`'s table with `payload`.
    ///
    /// `payload` must be a JSON array; an empty array is a no-op.
    #[instrument(skip(self, payload), fields(table = schema.table_name))]
    pub async fn replace(
        &self,
        schema: &'static TableSchema,
        payload: Value,
    ) -> Result<SyncOutcome, ServiceError> {
        let records = match payload {
            Value::Array(records) => records,
            other => {
                warn!(kind = json_kind(&other), "rejected non-array sync payload");
                return Err(ServiceError::BadRequest(format!(
                    "expected a JSON array of records, got {}",
                    json_kind(&other)
                )));
            }
        };

        info!(received = records.len(), "received {} sync payload", schema.display_name);
        if records.is_empty() {
            return Ok(SyncOutcome::NoOp);
        }

        let start = Instant::now();
        let outcome = match schema.ingest_mode() {
            IngestMode::Chunked => self.replace_chunked(schema, &records).await?,
            IngestMode::WholePayload => self.replace_whole(schema, &records).await?,
        };
        histogram!("syncdata.replace.duration", start.elapsed(), "table" => schema.table_name);

        Ok(outcome)
    }

    async fn replace_chunked(
        &self,
        schema: &'static TableSchema,
        records: &[Value],
    ) -> Result<SyncOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let engine = ChunkedIngest::new(schema, self.settings);

        let summary = match engine.run(&txn, records).await {
            Ok(summary) => summary,
            Err(err) => {
                error!("Failed to replace {}: {}", schema.table_name, err);
                rollback(txn).await;
                return Err(ServiceError::DatabaseError(err));
            }
        };

        txn.commit().await.map_err(|e| {
            error!("Failed to commit {} replace: {}", schema.table_name, e);
            ServiceError::DatabaseError(e)
        })?;
        counter!("syncdata.db.transaction.committed", 1);
        counter!("syncdata.records.persisted", summary.processed_count as u64, "table" => schema.table_name);
        counter!("syncdata.records.failed", summary.failed_count as u64, "table" => schema.table_name);

        info!(
            total = summary.total_count,
            processed = summary.processed_count,
            failed = summary.failed_count,
            fallback_chunks = summary.fallback_chunks,
            "{} sync completed",
            schema.display_name
        );
        Ok(SyncOutcome::Ingested(summary))
    }

    async fn replace_whole(
        &self,
        schema: &'static TableSchema,
        records: &[Value],
    ) -> Result<SyncOutcome, ServiceError> {
        let mut failures: Vec<RecordFailure> = Vec::new();
        let mut normalized = Vec::with_capacity(records.len());
        for (index, raw) in records.iter().enumerate() {
            match normalize_record(schema, index, raw) {
                Ok(record) => normalized.push(record),
                Err(failure) => failures.push(failure),
            }
        }
        if let Err(mut invalid) = validate_batch(schema, &normalized) {
            failures.append(&mut invalid);
        }

        if !failures.is_empty() {
            failures.sort_by_key(|failure| failure.index);
            error!(
                invalid = failures.len(),
                "{} payload rejected by validation",
                schema.display_name
            );
            for failure in failures.iter().take(LOGGED_INVALID_RECORDS) {
                if let Some(raw) = records.get(failure.index) {
                    error!(index = failure.index, reason = %failure.reason, record = %raw, "invalid record");
                }
            }
            counter!("syncdata.records.failed", failures.len() as u64, "table" => schema.table_name);
            return Err(ServiceError::RecordValidation(failures));
        }

        let store = TableStore::new(schema);
        let txn = self.db.begin().await?;
        let saved = match replace_all(&store, &txn, &normalized, self.settings.insert_batch_size).await {
            Ok(saved) => saved,
            Err(err) => {
                error!("Failed to replace {}: {}", schema.table_name, err);
                rollback(txn).await;
                return Err(ServiceError::DatabaseError(err));
            }
        };
        txn.commit().await?;
        counter!("syncdata.db.transaction.committed", 1);
        counter!("syncdata.records.persisted", saved as u64, "table" => schema.table_name);

        info!(saved, "{} records saved", schema.display_name);
        Ok(SyncOutcome::Replaced { saved })
    }

    /// Every row of `schema`'s table in insertion order, with derived fields.
    #[instrument(skip(self), fields(table = schema.table_name))]
    pub async fn list(&self, schema: &'static TableSchema) -> Result<Vec<Value>, ServiceError> {
        let rows = TableStore::new(schema)
            .fetch_all(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to read {}: {}", schema.table_name, e);
                ServiceError::DatabaseError(e)
            })?;
        Ok(rows.iter().map(|row| render_row(schema, row)).collect())
    }
}

async fn replace_all(
    store: &TableStore,
    txn: &DatabaseTransaction,
    records: &[NormalizedRecord],
    batch_size: usize,
) -> Result<usize, DbErr> {
    store.delete_all(txn).await?;
    store.insert_rows(txn, records, batch_size).await?;
    Ok(records.len())
}

async fn rollback(txn: DatabaseTransaction) {
    match txn.rollback().await {
        Ok(()) => {
            counter!("syncdata.db.transaction.rolled_back", 1);
        }
        Err(e) => {
            error!("Rollback failed: {}", e);
        }
    }
}

/// JSON view of a stored row: `id`, every field, `synced_at`, then the
/// derived `balance` where the table has one. Coded fields are shown by label.
pub fn render_row(schema: &TableSchema, row: &StoredRow) -> Value {
    let mut object = Map::new();
    object.insert(ID_COLUMN.to_string(), Value::from(row.id));

    for (name, value) in &row.values {
        let rendered = match (value, schema.field(name)) {
            (FieldValue::Text(Some(code)), Some(field)) if !field.labels.is_empty() => {
                Value::String(field.decode_label(code).unwrap_or(code.as_str()).to_string())
            }
            _ => render_value(value),
        };
        object.insert((*name).to_string(), rendered);
    }

    object.insert(
        SYNCED_AT_COLUMN.to_string(),
        row.synced_at
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null),
    );

    if let Some(balance) = schema
        .balance
        .compute(|name| row.value(name).and_then(FieldValue::as_decimal))
    {
        object.insert("balance".to_string(), decimal_to_json(balance));
    }

    Value::Object(object)
}

fn render_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(v) => v.clone().map(Value::String).unwrap_or(Value::Null),
        FieldValue::Decimal(v) => v.map(decimal_to_json).unwrap_or(Value::Null),
        FieldValue::Count(v) => v.map(Value::from).unwrap_or(Value::Null),
        FieldValue::Date(v) => v
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
    }
}

/// Amounts are served as JSON numbers, exact up to 15 significant digits.
fn decimal_to_json(value: rust_decimal::Decimal) -> Value {
    value
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{find, EntityTag, TableRole},
        services::test_db,
    };
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::ConnectionTrait;
    use serde_json::json;

    async fn service() -> SyncService {
        SyncService::new(Arc::new(test_db().await), IngestSettings::default())
    }

    /// Service plus its connection, for tests that tamper with the schema.
    async fn service_with_db() -> (SyncService, Arc<DatabaseConnection>) {
        let db = Arc::new(test_db().await);
        (SyncService::new(db.clone(), IngestSettings::default()), db)
    }

    #[tokio::test]
    async fn chunked_storage_failure_rolls_back_and_keeps_rows() {
        let (svc, db) = service_with_db().await;
        let schema = find(EntityTag::Dq, TableRole::Ledger).unwrap();
        svc.replace(schema, json!([{"code": "A"}, {"code": "B"}]))
            .await
            .unwrap();

        db.execute_unprepared(
            "CREATE TRIGGER dq_ledgers_locked BEFORE DELETE ON syncdata_dqledgers \
             BEGIN SELECT RAISE(ABORT, 'table locked'); END;",
        )
        .await
        .unwrap();

        let result = svc.replace(schema, json!([{"code": "C"}])).await;
        assert_matches!(result, Err(ServiceError::DatabaseError(_)));

        let rows = svc.list(schema).await.unwrap();
        let codes: Vec<_> = rows.iter().filter_map(|r| r["code"].as_str()).collect();
        assert_eq!(codes, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn whole_payload_storage_failure_restores_deleted_rows() {
        let (svc, db) = service_with_db().await;
        let schema = find(EntityTag::Dq, TableRole::Master).unwrap();
        svc.replace(schema, json!([{"code": "KEEP"}])).await.unwrap();

        db.execute_unprepared(
            "CREATE TRIGGER dq_master_guard BEFORE INSERT ON syncdata_dqrecord \
             WHEN NEW.code = 'BOOM' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .await
        .unwrap();

        let result = svc
            .replace(schema, json!([{"code": "NEW"}, {"code": "BOOM"}]))
            .await;
        assert_matches!(result, Err(ServiceError::DatabaseError(_)));

        let rows = svc.list(schema).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["code"], "KEEP");
    }

    #[test]
    fn amounts_within_fifteen_digits_render_exactly() {
        let rendered = render_value(&FieldValue::Decimal(Some(dec!(9876543210123.45))));
        assert_eq!(rendered.to_string(), "9876543210123.45");
        assert_eq!(render_value(&FieldValue::Decimal(Some(dec!(-0.05)))).to_string(), "-0.05");
    }

    #[tokio::test]
    async fn non_array_payload_is_a_bad_request() {
        let svc = service().await;
        let schema = find(EntityTag::Imc1, TableRole::Ledger).unwrap();
        let result = svc.replace(schema, json!({"code": "A"})).await;
        assert_matches!(result, Err(ServiceError::BadRequest(msg)) if msg.contains("an object"));
    }

    #[tokio::test]
    async fn empty_payload_keeps_existing_rows() {
        let svc = service().await;
        let schema = find(EntityTag::Dq, TableRole::Master).unwrap();
        svc.replace(schema, json!([{"code": "A"}])).await.unwrap();

        let outcome = svc.replace(schema, json!([])).await.unwrap();
        assert_eq!(outcome, SyncOutcome::NoOp);
        assert_eq!(svc.list(schema).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn master_payload_with_invalid_record_changes_nothing() {
        let svc = service().await;
        let schema = find(EntityTag::Imc2, TableRole::Master).unwrap();
        svc.replace(schema, json!([{"code": "KEEP"}])).await.unwrap();

        let result = svc
            .replace(schema, json!([{"code": "X"}, {"code": "y".repeat(101)}]))
            .await;
        assert_matches!(result, Err(ServiceError::RecordValidation(f)) if f.len() == 1 && f[0].index == 1);

        let rows = svc.list(schema).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["code"], "KEEP");
    }

    #[tokio::test]
    async fn imc1_master_balance_includes_opening_balance() {
        let svc = service().await;
        let imc1 = find(EntityTag::Imc1, TableRole::Master).unwrap();
        let imc2 = find(EntityTag::Imc2, TableRole::Master).unwrap();
        let record = json!([{"code": "A", "opening_balance": 50, "debit": 100, "credit": 30}]);

        svc.replace(imc1, record.clone()).await.unwrap();
        svc.replace(imc2, record).await.unwrap();

        assert_eq!(svc.list(imc1).await.unwrap()[0]["balance"].as_f64(), Some(120.0));
        assert_eq!(svc.list(imc2).await.unwrap()[0]["balance"].as_f64(), Some(70.0));
    }

    #[test]
    fn render_decodes_labels_and_passes_unknown_codes_through() {
        let schema = find(EntityTag::Planet, TableRole::ClientRoster).unwrap();
        let mut values: Vec<_> = schema
            .fields
            .iter()
            .map(|f| (f.name, FieldValue::Text(Some(String::new()))))
            .collect();
        for (name, value) in values.iter_mut() {
            match *name {
                "priorty" => *value = FieldValue::Text(Some("1".into())),
                "lictype" => *value = FieldValue::Text(Some("Z".into())),
                _ => {}
            }
        }
        let row = StoredRow {
            id: 1,
            values,
            synced_at: None,
        };

        let rendered = render_row(schema, &row);
        assert_eq!(rendered["priorty"], "High");
        assert_eq!(rendered["lictype"], "Z");
        assert!(rendered.get("balance").is_none());
    }
}
