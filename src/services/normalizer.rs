//! Field normalization for incoming sync records.
//!
//! Converts one raw JSON record into the canonical typed form the storage layer
//! expects. Malformed dates and decimals never reject a record: they degrade to
//! null (or zero) and are logged. Only a non-object record or a blank required
//! field is a hard rejection.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::Value as DbValue;
use serde_json::Value;
use tracing::warn;

use crate::{
    entities::{FieldKind, FieldSpec, TableSchema},
    errors::RecordFailure,
};

/// Accepted date layouts, tried in order; first match wins.
pub const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%Y-%m-%d %H:%M:%S", "%d-%m-%Y"];

/// Canonical typed value of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(Option<String>),
    Decimal(Option<Decimal>),
    Count(Option<i64>),
    Date(Option<NaiveDate>),
}

impl FieldValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Decimal(value) => *value,
            FieldValue::Count(value) => value.map(Decimal::from),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => value.as_deref(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            FieldValue::Text(v) => v.is_none(),
            FieldValue::Decimal(v) => v.is_none(),
            FieldValue::Count(v) => v.is_none(),
            FieldValue::Date(v) => v.is_none(),
        }
    }

    pub fn into_db_value(self) -> DbValue {
        match self {
            FieldValue::Text(v) => v.into(),
            FieldValue::Decimal(v) => v.into(),
            FieldValue::Count(v) => v.into(),
            FieldValue::Date(v) => v.into(),
        }
    }
}

/// A record in canonical form, values in the table's field order.
///
/// `issues` holds value-shape problems (e.g. an object where text was
/// expected); they do not reject the record here but fail validation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub index: usize,
    pub values: Vec<(&'static str, FieldValue)>,
    pub issues: Vec<String>,
}

impl NormalizedRecord {
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }
}

/// Normalizes one raw record against `schema`.
///
/// Returns a [`RecordFailure`] carrying `index` when the record is not an
/// object or a required field is missing or blank.
pub fn normalize_record(
    schema: &TableSchema,
    index: usize,
    raw: &Value,
) -> Result<NormalizedRecord, RecordFailure> {
    let Some(object) = raw.as_object() else {
        return Err(RecordFailure::new(index, "record is not a JSON object"));
    };

    let mut values = Vec::with_capacity(schema.fields.len());
    let mut issues = Vec::new();

    for field in schema.fields {
        let raw_value = object.get(field.name).unwrap_or(&Value::Null);

        if field.required && is_blank(raw_value) {
            return Err(RecordFailure::new(
                index,
                format!("missing required field `{}`", field.name),
            ));
        }

        let value = normalize_field(field, raw_value, &mut issues);
        values.push((field.name, value));
    }

    Ok(NormalizedRecord {
        index,
        values,
        issues,
    })
}

fn normalize_field(field: &FieldSpec, raw: &Value, issues: &mut Vec<String>) -> FieldValue {
    match field.kind {
        FieldKind::Text => {
            FieldValue::Text(Some(normalize_text(field, raw, issues).unwrap_or_default()))
        }
        FieldKind::OptionalText => FieldValue::Text(normalize_text(field, raw, issues)),
        FieldKind::Decimal | FieldKind::Integral => {
            FieldValue::Decimal(normalize_scaled_decimal(field, raw))
        }
        FieldKind::DecimalOrZero => FieldValue::Decimal(Some(
            normalize_scaled_decimal(field, raw).unwrap_or(Decimal::ZERO),
        )),
        FieldKind::Count => FieldValue::Count(normalize_count(field, raw)),
        FieldKind::Date => FieldValue::Date(normalize_date_value(raw)),
    }
}

fn normalize_text(field: &FieldSpec, raw: &Value, issues: &mut Vec<String>) -> Option<String> {
    match raw {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            issues.push(format!("field `{}` must be text", field.name));
            None
        }
    }
}

fn normalize_scaled_decimal(field: &FieldSpec, raw: &Value) -> Option<Decimal> {
    if is_blank(raw) {
        return None;
    }
    match normalize_decimal(raw) {
        Some(value) => {
            Some(value.round_dp_with_strategy(field.scale(), RoundingStrategy::MidpointAwayFromZero))
        }
        None => {
            warn!(field = field.name, value = %raw, "unparseable decimal value, storing default");
            None
        }
    }
}

fn normalize_count(field: &FieldSpec, raw: &Value) -> Option<i64> {
    if is_blank(raw) {
        return None;
    }
    let parsed = match raw {
        Value::Number(n) => n.as_i64().or_else(|| normalize_decimal(raw).and_then(whole_number)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| normalize_decimal(raw).and_then(whole_number)),
        _ => None,
    };
    if parsed.is_none() {
        warn!(field = field.name, value = %raw, "unparseable count value, storing null");
    }
    parsed
}

fn whole_number(value: Decimal) -> Option<i64> {
    if value.fract().is_zero() {
        value.to_i64()
    } else {
        None
    }
}

/// Parses a JSON string or number as a fixed-point decimal.
///
/// Scientific notation is accepted. Blank strings, null and non-numeric
/// values yield `None`; no rounding is applied.
pub fn normalize_decimal(raw: &Value) -> Option<Decimal> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Parses a date string in any of [`DATE_FORMATS`].
pub fn normalize_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    DATE_FORMATS.iter().find_map(|format| {
        if format.contains("%H") {
            NaiveDateTime::parse_from_str(input, format)
                .ok()
                .map(|dt| dt.date())
        } else {
            NaiveDate::parse_from_str(input, format).ok()
        }
    })
}

fn normalize_date_value(raw: &Value) -> Option<NaiveDate> {
    raw.as_str().and_then(normalize_date)
}

fn is_blank(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{find, EntityTag, TableRole};
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn ledger() -> &'static TableSchema {
        find(EntityTag::Imc1, TableRole::Ledger).unwrap()
    }

    fn master() -> &'static TableSchema {
        find(EntityTag::Imc2, TableRole::Master).unwrap()
    }

    #[rstest]
    #[case("2024-03-15")]
    #[case("15/03/2024")]
    #[case("2024-03-15 00:00:00")]
    #[case("15-03-2024")]
    #[case("  2024-03-15 ")]
    fn date_formats_share_canonical_form(#[case] input: &str) {
        assert_eq!(
            normalize_date(input),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
    }

    #[rstest]
    #[case("not-a-date")]
    #[case("")]
    #[case("2024/03/15")]
    #[case("31/02/2024")]
    fn unparseable_dates_become_none(#[case] input: &str) {
        assert_eq!(normalize_date(input), None);
    }

    #[rstest]
    #[case(json!("12.5"), Some(dec!(12.5)))]
    #[case(json!(12.5), Some(dec!(12.5)))]
    #[case(json!(" 7 "), Some(dec!(7)))]
    #[case(json!("1e3"), Some(dec!(1000)))]
    #[case(json!(""), None)]
    #[case(json!(null), None)]
    #[case(json!("abc"), None)]
    #[case(json!(true), None)]
    fn decimal_parsing(#[case] raw: Value, #[case] expected: Option<Decimal>) {
        assert_eq!(normalize_decimal(&raw), expected);
    }

    #[test]
    fn blank_ledger_money_is_null_but_master_money_is_zero() {
        let ledger_record =
            normalize_record(ledger(), 0, &json!({"code": "L1", "debit": "", "credit": null}))
                .unwrap();
        assert_eq!(ledger_record.value("debit"), Some(&FieldValue::Decimal(None)));
        assert_eq!(ledger_record.value("credit"), Some(&FieldValue::Decimal(None)));

        let master_record = normalize_record(master(), 0, &json!({"debit": ""})).unwrap();
        assert_eq!(
            master_record.value("debit"),
            Some(&FieldValue::Decimal(Some(Decimal::ZERO)))
        );
        assert_eq!(
            master_record.value("opening_balance"),
            Some(&FieldValue::Decimal(Some(Decimal::ZERO)))
        );
    }

    #[test]
    fn decimals_round_to_field_scale() {
        let record = normalize_record(
            ledger(),
            0,
            &json!({"code": "L1", "debit": "10.005", "voucher_no": "41.5"}),
        )
        .unwrap();
        assert_eq!(record.value("debit"), Some(&FieldValue::Decimal(Some(dec!(10.01)))));
        assert_eq!(record.value("voucher_no"), Some(&FieldValue::Decimal(Some(dec!(42)))));
    }

    #[test]
    fn missing_required_code_rejects_record_with_index() {
        let failure = normalize_record(ledger(), 7, &json!({"particulars": "x"})).unwrap_err();
        assert_eq!(failure.index, 7);
        assert!(failure.reason.contains("`code`"));

        let blank = normalize_record(ledger(), 8, &json!({"code": "   "}));
        assert_matches!(blank, Err(RecordFailure { index: 8, .. }));
    }

    #[test]
    fn non_object_record_is_rejected() {
        let failure = normalize_record(master(), 2, &json!(["code", "A"])).unwrap_err();
        assert_eq!(failure, RecordFailure::new(2, "record is not a JSON object"));
    }

    #[test]
    fn text_handling_differs_between_master_and_ledger() {
        let master_record = normalize_record(master(), 0, &json!({"code": 101})).unwrap();
        assert_eq!(master_record.value("code").and_then(FieldValue::as_text), Some("101"));
        assert_eq!(master_record.value("place").and_then(FieldValue::as_text), Some(""));

        let ledger_record = normalize_record(ledger(), 0, &json!({"code": "L1"})).unwrap();
        assert_eq!(ledger_record.value("narration"), Some(&FieldValue::Text(None)));
    }

    #[test]
    fn structured_text_values_become_issues() {
        let record =
            normalize_record(ledger(), 0, &json!({"code": "L1", "narration": {"a": 1}})).unwrap();
        assert_eq!(record.issues, vec!["field `narration` must be text".to_string()]);
    }

    #[test]
    fn invalid_date_keeps_record() {
        let record =
            normalize_record(ledger(), 0, &json!({"code": "L1", "entry_date": "not-a-date"}))
                .unwrap();
        assert_eq!(record.value("entry_date"), Some(&FieldValue::Date(None)));
        assert!(record.issues.is_empty());
    }

    #[test]
    fn counts_accept_whole_numbers_only() {
        let roster = find(EntityTag::Planet, TableRole::ClientRoster).unwrap();
        let record = normalize_record(roster, 0, &json!({"code": "C1", "clients": "12"})).unwrap();
        assert_eq!(record.value("clients"), Some(&FieldValue::Count(Some(12))));

        let record = normalize_record(roster, 0, &json!({"code": "C1", "clients": 3.5})).unwrap();
        assert_eq!(record.value("clients"), Some(&FieldValue::Count(None)));
    }
}
