//! Record validation applied after normalization.
//!
//! Single-record checks cover value shape, text length and decimal digit
//! limits. Batch validation adds duplicate detection on unique fields so a
//! chunk with internal duplicates goes straight to the per-record path.

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::{
    entities::{FieldSpec, TableSchema},
    errors::RecordFailure,
    services::normalizer::{FieldValue, NormalizedRecord},
};

/// Validates one normalized record.
pub fn validate_record(schema: &TableSchema, record: &NormalizedRecord) -> Result<(), RecordFailure> {
    if !record.issues.is_empty() {
        return Err(RecordFailure::new(record.index, record.issues.join("; ")));
    }

    for (name, value) in &record.values {
        let Some(field) = schema.field(name) else {
            continue;
        };
        check_field(field, value).map_err(|reason| RecordFailure::new(record.index, reason))?;
    }
    Ok(())
}

fn check_field(field: &FieldSpec, value: &FieldValue) -> Result<(), String> {
    match value {
        FieldValue::Text(Some(text)) => {
            if let Some(max) = field.max_length {
                if text.chars().count() > max {
                    return Err(format!("field `{}` exceeds {} characters", field.name, max));
                }
            }
        }
        FieldValue::Decimal(Some(number)) => {
            if let Some(max_digits) = field.max_digits() {
                let integer_digits = max_digits.saturating_sub(field.scale());
                let limit = Decimal::from_i128_with_scale(10_i128.pow(integer_digits), 0);
                if number.abs() >= limit {
                    return Err(format!(
                        "field `{}` exceeds {} digits ({} decimal places)",
                        field.name,
                        max_digits,
                        field.scale()
                    ));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validates a batch of normalized records together.
///
/// Returns every failure found; an `Ok` batch is safe to bulk insert as far
/// as this service can tell without touching storage.
pub fn validate_batch(
    schema: &TableSchema,
    records: &[NormalizedRecord],
) -> Result<(), Vec<RecordFailure>> {
    let mut failures: Vec<RecordFailure> = records
        .iter()
        .filter_map(|record| validate_record(schema, record).err())
        .collect();

    for field in schema.fields.iter().filter(|field| field.unique) {
        let mut seen = HashSet::new();
        for record in records {
            let Some(key) = record.value(field.name).and_then(FieldValue::as_text) else {
                continue;
            };
            if !seen.insert(key) {
                failures.push(RecordFailure::new(
                    record.index,
                    format!("duplicate value for unique field `{}`: {}", field.name, key),
                ));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        failures.sort_by_key(|failure| failure.index);
        Err(failures)
    }
}
