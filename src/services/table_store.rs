//! Storage access for registry tables.
//!
//! Statements are built with the sea-query builder from the table's
//! [`TableSchema`], so one implementation serves every synchronized table.

use std::iter;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, Expr, Func, Order, Query, SimpleExpr},
    ConnectionTrait, DatabaseTransaction, DbBackend, DbErr, QueryResult, TransactionTrait,
};
use tracing::debug;

use crate::{
    entities::{FieldKind, TableSchema, ID_COLUMN, SYNCED_AT_COLUMN},
    services::normalizer::{FieldValue, NormalizedRecord},
};

/// Bind parameters a single statement may carry on `backend`.
fn max_bind_params(backend: DbBackend) -> usize {
    match backend {
        DbBackend::Sqlite => 32_766,
        _ => 65_535,
    }
}

/// One stored row as read back from the database
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i32,
    pub values: Vec<(&'static str, FieldValue)>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl StoredRow {
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableStore {
    schema: &'static TableSchema,
}

impl TableStore {
    pub fn new(schema: &'static TableSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &'static TableSchema {
        self.schema
    }

    /// Deletes every row of the table, returning how many were removed.
    pub async fn delete_all<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, DbErr> {
        let stmt = Query::delete()
            .from_table(Alias::new(self.schema.table_name))
            .to_owned();
        let result = conn.execute(conn.get_database_backend().build(&stmt)).await?;
        Ok(result.rows_affected())
    }

    /// Rows per INSERT: `requested`, lowered so one statement stays within
    /// the backend's bind-parameter limit.
    pub fn rows_per_statement(&self, backend: DbBackend, requested: usize) -> usize {
        let params_per_row = self.schema.fields.len() + 1;
        let ceiling = (max_bind_params(backend) / params_per_row).max(1);
        requested.clamp(1, ceiling)
    }

    /// Inserts `records` in multi-row statements of at most `batch_size` rows.
    ///
    /// All rows share one `synced_at` timestamp.
    pub async fn insert_rows<C: ConnectionTrait>(
        &self,
        conn: &C,
        records: &[NormalizedRecord],
        batch_size: usize,
    ) -> Result<u64, DbErr> {
        let synced_at = Utc::now();
        let mut inserted = 0;
        let batch_size = self.rows_per_statement(conn.get_database_backend(), batch_size);

        for batch in records.chunks(batch_size) {
            let mut stmt = Query::insert();
            stmt.into_table(Alias::new(self.schema.table_name)).columns(
                self.schema
                    .fields
                    .iter()
                    .map(|field| Alias::new(field.name))
                    .chain(iter::once(Alias::new(SYNCED_AT_COLUMN))),
            );

            for record in batch {
                let row = record
                    .values
                    .iter()
                    .map(|(_, value)| SimpleExpr::Value(value.clone().into_db_value()))
                    .chain(iter::once(SimpleExpr::Value(synced_at.into())));
                stmt.values(row).map_err(|e| DbErr::Custom(e.to_string()))?;
            }

            let result = conn.execute(conn.get_database_backend().build(&stmt)).await?;
            inserted += result.rows_affected();
        }

        debug!(table = self.schema.table_name, inserted, "inserted rows");
        Ok(inserted)
    }

    /// Runs [`Self::insert_rows`] inside a savepoint of `txn`.
    ///
    /// The outer `Result` carries savepoint failures, which poison the whole
    /// replace; the inner one carries the insert outcome, which the caller may
    /// recover from because the savepoint has already been rolled back.
    pub async fn insert_rows_isolated(
        &self,
        txn: &DatabaseTransaction,
        records: &[NormalizedRecord],
        batch_size: usize,
    ) -> Result<Result<u64, DbErr>, DbErr> {
        let savepoint = txn.begin().await?;
        match self.insert_rows(&savepoint, records, batch_size).await {
            Ok(inserted) => {
                savepoint.commit().await?;
                Ok(Ok(inserted))
            }
            Err(err) => {
                savepoint.rollback().await?;
                Ok(Err(err))
            }
        }
    }

    /// Reads the whole table in insertion order.
    pub async fn fetch_all<C: ConnectionTrait>(&self, conn: &C) -> Result<Vec<StoredRow>, DbErr> {
        let mut stmt = Query::select();
        stmt.column(Alias::new(ID_COLUMN))
            .columns(self.schema.fields.iter().map(|field| Alias::new(field.name)))
            .column(Alias::new(SYNCED_AT_COLUMN))
            .from(Alias::new(self.schema.table_name))
            .order_by(Alias::new(ID_COLUMN), Order::Asc);

        let rows = conn.query_all(conn.get_database_backend().build(&stmt)).await?;
        rows.iter().map(|row| self.decode_row(row)).collect()
    }

    pub async fn count<C: ConnectionTrait>(&self, conn: &C) -> Result<u64, DbErr> {
        let stmt = Query::select()
            .expr_as(Func::count(Expr::col(Alias::new(ID_COLUMN))), Alias::new("total"))
            .from(Alias::new(self.schema.table_name))
            .to_owned();
        let total = conn
            .query_one(conn.get_database_backend().build(&stmt))
            .await?
            .map(|row| row.try_get::<i64>("", "total"))
            .transpose()?
            .unwrap_or_default();
        Ok(total.max(0) as u64)
    }

    fn decode_row(&self, row: &QueryResult) -> Result<StoredRow, DbErr> {
        let mut values = Vec::with_capacity(self.schema.fields.len());
        for field in self.schema.fields {
            let value = match field.kind {
                FieldKind::Text | FieldKind::OptionalText => {
                    FieldValue::Text(row.try_get::<Option<String>>("", field.name)?)
                }
                FieldKind::Decimal | FieldKind::DecimalOrZero | FieldKind::Integral => {
                    FieldValue::Decimal(
                        row.try_get::<Option<Decimal>>("", field.name)?
                            .map(|d| d.round_dp(field.scale())),
                    )
                }
                FieldKind::Count => FieldValue::Count(row.try_get::<Option<i64>>("", field.name)?),
                FieldKind::Date => FieldValue::Date(row.try_get("", field.name)?),
            };
            values.push((field.name, value));
        }

        Ok(StoredRow {
            id: row.try_get("", ID_COLUMN)?,
            values,
            synced_at: row.try_get("", SYNCED_AT_COLUMN)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{find, EntityTag, TableRole},
        services::normalizer::normalize_record,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use serde_json::json;

    async fn setup() -> sea_orm::DatabaseConnection {
        crate::services::test_db().await
    }

    fn ledger_store() -> TableStore {
        TableStore::new(find(EntityTag::Imc1, TableRole::Ledger).unwrap())
    }

    fn records(store: &TableStore, raw: &[serde_json::Value]) -> Vec<NormalizedRecord> {
        raw.iter()
            .enumerate()
            .map(|(i, r)| normalize_record(store.schema(), i, r).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn typed_values_survive_storage() {
        let db = setup().await;
        let store = ledger_store();
        let rows = records(
            &store,
            &[json!({
                "code": "L1",
                "particulars": "Opening",
                "debit": "100.50",
                "entry_date": "15/03/2024",
                "voucher_no": 42
            })],
        );

        assert_eq!(store.insert_rows(&db, &rows, 1000).await.unwrap(), 1);

        let stored = store.fetch_all(&db).await.unwrap();
        assert_eq!(stored.len(), 1);
        let row = &stored[0];
        assert_eq!(row.value("debit"), Some(&FieldValue::Decimal(Some(dec!(100.50)))));
        assert_eq!(row.value("credit"), Some(&FieldValue::Decimal(None)));
        assert_eq!(
            row.value("entry_date"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15)))
        );
        assert_eq!(row.value("narration"), Some(&FieldValue::Text(None)));
        assert!(row.synced_at.is_some());
    }

    #[tokio::test]
    async fn small_batches_keep_submission_order() {
        let db = setup().await;
        let store = ledger_store();
        let rows = records(
            &store,
            &[json!({"code": "C"}), json!({"code": "A"}), json!({"code": "B"})],
        );

        assert_eq!(store.insert_rows(&db, &rows, 2).await.unwrap(), 3);

        let codes: Vec<_> = store
            .fetch_all(&db)
            .await
            .unwrap()
            .iter()
            .map(|row| row.value("code").and_then(FieldValue::as_text).map(str::to_owned))
            .collect();
        assert_eq!(codes, vec![Some("C".into()), Some("A".into()), Some("B".into())]);
        assert_eq!(store.count(&db).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_isolated_insert_leaves_transaction_usable() {
        let db = setup().await;
        let store = ledger_store();
        let first = records(&store, &[json!({"code": "A"})]);

        let txn = db.begin().await.unwrap();
        assert_eq!(
            store.insert_rows_isolated(&txn, &first, 10).await.unwrap().unwrap(),
            1
        );
        let duplicate = store.insert_rows_isolated(&txn, &first, 10).await.unwrap();
        assert!(duplicate.is_err());
        let second = records(&store, &[json!({"code": "B"})]);
        store.insert_rows_isolated(&txn, &second, 10).await.unwrap().unwrap();
        txn.commit().await.unwrap();

        assert_eq!(store.count(&db).await.unwrap(), 2);
        assert_eq!(store.delete_all(&db).await.unwrap(), 2);
        assert_eq!(store.count(&db).await.unwrap(), 0);
    }

    #[test]
    fn statement_rows_respect_bind_limits() {
        let roster = TableStore::new(find(EntityTag::Planet, TableRole::ClientRoster).unwrap());
        let per_row = roster.schema().fields.len() + 1;

        let sqlite = roster.rows_per_statement(DbBackend::Sqlite, 5000);
        assert!(sqlite * per_row <= 32_766);
        assert!((sqlite + 1) * per_row > 32_766);
        assert!(roster.rows_per_statement(DbBackend::Postgres, 5000) * per_row <= 65_535);

        assert_eq!(roster.rows_per_statement(DbBackend::Sqlite, 10), 10);
        assert_eq!(roster.rows_per_statement(DbBackend::Sqlite, 0), 1);
    }

    #[tokio::test]
    async fn wide_tables_insert_past_one_statement() {
        let db = setup().await;
        let roster = TableStore::new(find(EntityTag::Planet, TableRole::ClientRoster).unwrap());
        let raw: Vec<_> = (0..2000).map(|i| json!({"code": format!("R{i:04}")})).collect();
        let rows = records(&roster, &raw);

        assert_eq!(roster.insert_rows(&db, &rows, 5000).await.unwrap(), 2000);
        assert_eq!(roster.count(&db).await.unwrap(), 2000);
    }
}
