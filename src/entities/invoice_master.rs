use super::{FieldKind, FieldSpec};

/// Invoice headers, one per customer id.
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("customerid", 100).required().unique(),
    FieldSpec::new("modeofpayment", FieldKind::OptionalText).max_length(50),
    FieldSpec::new("invdate", FieldKind::Date),
    FieldSpec::new("nettotal", FieldKind::Decimal),
    FieldSpec::new("paid", FieldKind::Decimal),
    FieldSpec::new("bill_ref", FieldKind::OptionalText).max_length(100),
];
