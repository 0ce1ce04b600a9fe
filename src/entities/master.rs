//! Master (chart-of-accounts) records: one row per account with opening
//! balance and period totals.

use super::{FieldKind, FieldSpec};

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("code", 100),
    FieldSpec::text("name", 200),
    FieldSpec::new("opening_balance", FieldKind::DecimalOrZero),
    FieldSpec::new("debit", FieldKind::DecimalOrZero),
    FieldSpec::new("credit", FieldKind::DecimalOrZero),
    FieldSpec::text("place", 200),
    FieldSpec::text("phone2", 50),
    FieldSpec::text("openingdepartment", 100),
];
