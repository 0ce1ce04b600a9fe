//! Ledger entries keyed by a unique entry code.

use super::{FieldKind, FieldSpec};

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("code", 100).required().unique(),
    FieldSpec::new("particulars", FieldKind::OptionalText),
    FieldSpec::new("debit", FieldKind::Decimal),
    FieldSpec::new("credit", FieldKind::Decimal),
    FieldSpec::new("entry_mode", FieldKind::OptionalText).max_length(50),
    FieldSpec::new("entry_date", FieldKind::Date),
    FieldSpec::new("voucher_no", FieldKind::Integral),
    FieldSpec::new("narration", FieldKind::OptionalText),
];
