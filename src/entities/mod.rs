//! Declarative table registry.
//!
//! Every synchronized table is described by a [`TableSchema`] keyed by
//! (entity tag, table role). Normalization, validation, DDL, storage and the
//! read path are all driven from these descriptions, so the sixteen tables
//! share one code path.

pub mod client_roster;
pub mod invoice_master;
pub mod ledger;
pub mod master;

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, ColumnDef, Table, TableCreateStatement},
    DbBackend,
};
use serde::Serialize;
use strum::{Display, EnumIter};

/// Surrogate key present on every table; gives a stable submission order.
pub const ID_COLUMN: &str = "id";
/// Insert timestamp present on every table.
pub const SYNCED_AT_COLUMN: &str = "synced_at";

const MONEY_SCALE: u32 = 2;
const MAX_DIGITS: u32 = 18;

/// External system a payload originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
pub enum EntityTag {
    #[strum(serialize = "IMC1")]
    #[serde(rename = "IMC1")]
    Imc1,
    #[strum(serialize = "IMC2")]
    #[serde(rename = "IMC2")]
    Imc2,
    Sysmac,
    #[strum(serialize = "DQ")]
    #[serde(rename = "DQ")]
    Dq,
    Planet,
}

/// Structural shape of a synchronized table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
pub enum TableRole {
    Master,
    Ledger,
    InvoiceMaster,
    ClientRoster,
}

/// How a POST to a table is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Chunked ingest with per-record fallback; partial success is reported.
    Chunked,
    /// Validate everything first; any invalid record rejects the request.
    WholePayload,
}

impl TableRole {
    pub fn ingest_mode(self) -> IngestMode {
        match self {
            TableRole::Ledger | TableRole::InvoiceMaster => IngestMode::Chunked,
            TableRole::Master | TableRole::ClientRoster => IngestMode::WholePayload,
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            TableRole::Master => master::FIELDS,
            TableRole::Ledger => ledger::FIELDS,
            TableRole::InvoiceMaster => invoice_master::FIELDS,
            TableRole::ClientRoster => client_roster::FIELDS,
        }
    }
}

/// Normalization and storage kind of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text; null becomes an empty string.
    Text,
    /// Free text that may stay null.
    OptionalText,
    /// Fixed-point money; blank or unparseable becomes null.
    Decimal,
    /// Fixed-point money; blank or unparseable becomes zero.
    DecimalOrZero,
    /// Whole-number decimal such as a voucher number.
    Integral,
    /// Integer count.
    Count,
    /// Calendar date accepted in several textual formats.
    Date,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub labels: &'static [(&'static str, &'static str)],
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            unique: false,
            max_length: None,
            labels: &[],
        }
    }

    pub const fn text(name: &'static str, max_length: usize) -> Self {
        Self::new(name, FieldKind::Text).max_length(max_length)
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub const fn labels(mut self, labels: &'static [(&'static str, &'static str)]) -> Self {
        self.labels = labels;
        self
    }

    /// Decimal places kept in the canonical form.
    pub fn scale(&self) -> u32 {
        match self.kind {
            FieldKind::Decimal | FieldKind::DecimalOrZero => MONEY_SCALE,
            _ => 0,
        }
    }

    /// Total significant digits allowed for decimal kinds.
    pub fn max_digits(&self) -> Option<u32> {
        match self.kind {
            FieldKind::Decimal | FieldKind::DecimalOrZero | FieldKind::Integral => Some(MAX_DIGITS),
            _ => None,
        }
    }

    pub fn is_nullable(&self) -> bool {
        !matches!(self.kind, FieldKind::Text | FieldKind::DecimalOrZero) && !self.required
    }

    /// Label for a coded value, if this field is coded and the code is known.
    pub fn decode_label(&self, code: &str) -> Option<&'static str> {
        let code = code.trim();
        self.labels
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(code))
            .map(|(_, label)| *label)
    }

    fn column_def(&self, backend: DbBackend) -> ColumnDef {
        let mut def = ColumnDef::new(Alias::new(self.name));
        match self.kind {
            FieldKind::Text | FieldKind::OptionalText => match self.max_length {
                Some(len) => def.string_len(len as u32),
                None => def.text(),
            },
            // SQLite DDL rejects precision above 16; digits are capped by validation there
            FieldKind::Decimal | FieldKind::DecimalOrZero | FieldKind::Integral => match backend {
                DbBackend::Sqlite => def.decimal(),
                _ => def.decimal_len(MAX_DIGITS, self.scale()),
            },
            FieldKind::Count => def.big_integer(),
            FieldKind::Date => def.date(),
        };
        if self.is_nullable() {
            def.null();
        } else {
            def.not_null();
        }
        if self.unique {
            def.unique_key();
        }
        def
    }
}

/// Derived `balance` computed on read, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceRule {
    None,
    DebitMinusCredit,
    OpeningPlusDebitMinusCredit,
    NetTotalMinusPaid,
}

impl BalanceRule {
    /// Missing or null operands count as zero.
    pub fn compute(self, value_of: impl Fn(&str) -> Option<Decimal>) -> Option<Decimal> {
        let operand = |name: &str| value_of(name).unwrap_or(Decimal::ZERO);
        match self {
            BalanceRule::None => None,
            BalanceRule::DebitMinusCredit => Some(operand("debit") - operand("credit")),
            BalanceRule::OpeningPlusDebitMinusCredit => {
                Some(operand("opening_balance") + operand("debit") - operand("credit"))
            }
            BalanceRule::NetTotalMinusPaid => Some(operand("nettotal") - operand("paid")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub tag: EntityTag,
    pub role: TableRole,
    /// Route segment, without slashes.
    pub route: &'static str,
    pub table_name: &'static str,
    /// Human readable name used in log lines and response messages.
    pub display_name: &'static str,
    pub balance: BalanceRule,
    pub fields: &'static [FieldSpec],
}

impl TableSchema {
    fn new(
        tag: EntityTag,
        role: TableRole,
        route: &'static str,
        table_name: &'static str,
        display_name: &'static str,
    ) -> Self {
        let balance = match role {
            TableRole::Master => BalanceRule::DebitMinusCredit,
            TableRole::Ledger => BalanceRule::DebitMinusCredit,
            TableRole::InvoiceMaster => BalanceRule::NetTotalMinusPaid,
            TableRole::ClientRoster => BalanceRule::None,
        };
        Self {
            tag,
            role,
            route,
            table_name,
            display_name,
            balance,
            fields: role.fields(),
        }
    }

    fn with_balance(mut self, balance: BalanceRule) -> Self {
        self.balance = balance;
        self
    }

    pub fn ingest_mode(&self) -> IngestMode {
        self.role.ingest_mode()
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// DDL for this table on `backend`, used by the migrator.
    pub fn create_table_statement(&self, backend: DbBackend) -> TableCreateStatement {
        let mut table = Table::create();
        table
            .table(Alias::new(self.table_name))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new(ID_COLUMN))
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            );
        for field in self.fields {
            table.col(&mut field.column_def(backend));
        }
        table.col(
            ColumnDef::new(Alias::new(SYNCED_AT_COLUMN))
                .timestamp_with_time_zone()
                .not_null(),
        );
        table.to_owned()
    }
}

static REGISTRY: Lazy<Vec<TableSchema>> = Lazy::new(|| {
    use EntityTag::*;
    use TableRole::*;

    vec![
        TableSchema::new(Imc1, Master, "imc1", "syncdata_imc1record", "IMC-1")
            .with_balance(BalanceRule::OpeningPlusDebitMinusCredit),
        TableSchema::new(Imc1, Ledger, "imc1-ledgers", "syncdata_imc1ledgers", "IMC-1 ledger"),
        TableSchema::new(Imc1, InvoiceMaster, "imc1-invmast", "syncdata_imc1invmast", "IMC-1 invoice master"),
        TableSchema::new(Imc2, Master, "imc2", "syncdata_imc2record", "IMC-2"),
        TableSchema::new(Imc2, Ledger, "imc2-ledgers", "syncdata_imc2ledgers", "IMC-2 ledger"),
        TableSchema::new(Imc2, InvoiceMaster, "imc2-invmast", "syncdata_imc2invmast", "IMC-2 invoice master"),
        TableSchema::new(Sysmac, Master, "sysmac-info", "syncdata_sysmacinfo", "Sysmac"),
        TableSchema::new(Sysmac, Ledger, "sysmac-info-ledgers", "syncdata_sysmacledgers", "Sysmac ledger"),
        TableSchema::new(Sysmac, InvoiceMaster, "sysmac-info-invmast", "syncdata_sysmacinvmast", "Sysmac invoice master"),
        TableSchema::new(Dq, Master, "dq", "syncdata_dqrecord", "DQ"),
        TableSchema::new(Dq, Ledger, "dq-ledgers", "syncdata_dqledgers", "DQ ledger"),
        TableSchema::new(Dq, InvoiceMaster, "dq-invmast", "syncdata_dqinvmast", "DQ invoice master"),
        // Planet tables keep the legacy "sysmac" routes the source system still posts to.
        TableSchema::new(Planet, Master, "sysmac", "syncdata_planetmaster", "Planet master"),
        TableSchema::new(Planet, Ledger, "sysmac-ledgers", "syncdata_planetledgers", "Planet ledger"),
        TableSchema::new(Planet, InvoiceMaster, "sysmac-invmast", "syncdata_planetinvmast", "Planet invoice master"),
        TableSchema::new(Planet, ClientRoster, "rrc-clients", "syncdata_planetclients", "RRC client"),
    ]
});

/// All synchronized tables, in route declaration order.
pub fn registry() -> &'static [TableSchema] {
    &REGISTRY
}

pub fn find(tag: EntityTag, role: TableRole) -> Option<&'static TableSchema> {
    registry()
        .iter()
        .find(|schema| schema.tag == tag && schema.role == role)
}
