//! Planet client roster. Several columns arrive as single-letter or numeric
//! codes and are decoded to labels on read.

use super::{FieldKind, FieldSpec};

pub const PRIORITY_LABELS: &[(&str, &str)] = &[("1", "High"), ("2", "Medium"), ("3", "Low")];
pub const DIRECT_DEALING_LABELS: &[(&str, &str)] = &[("Y", "Yes"), ("N", "No")];
pub const AMC_LABELS: &[(&str, &str)] = &[("Y", "Active"), ("N", "Inactive")];
pub const LICENSE_TYPE_LABELS: &[(&str, &str)] = &[
    ("S", "Single User"),
    ("M", "Multi User"),
    ("N", "Network"),
];

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("code", 100).required().unique(),
    FieldSpec::text("name", 200),
    FieldSpec::text("address", 255),
    FieldSpec::text("branch", 100),
    FieldSpec::text("district", 100),
    FieldSpec::text("state", 100),
    FieldSpec::text("software", 100),
    FieldSpec::text("mobile", 50),
    FieldSpec::new("installationdate", FieldKind::Date),
    // spelling matches the column the source system sends
    FieldSpec::text("priorty", 10).labels(PRIORITY_LABELS),
    FieldSpec::text("directdealing", 10).labels(DIRECT_DEALING_LABELS),
    FieldSpec::text("rout", 100),
    FieldSpec::text("amc", 10).labels(AMC_LABELS),
    FieldSpec::new("amcamt", FieldKind::DecimalOrZero),
    FieldSpec::text("accountcode", 100),
    FieldSpec::text("address3", 255),
    FieldSpec::text("lictype", 10).labels(LICENSE_TYPE_LABELS),
    FieldSpec::new("clients", FieldKind::Count),
    FieldSpec::text("sp", 100),
    FieldSpec::text("nature", 100),
];
