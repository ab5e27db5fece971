//! The fixed relational schema for labeled samples
//!
//! ```text
//! sample_value ──► metric_instance ──► sample_name
//!                        │
//!                        ▼
//!                    label_set ◄── label_set_membership ──► label_key
//!                                          │
//!                                          ▼
//!                                     label_value
//! ```
//!
//! Table and column names are compile-time constants. They are the only
//! identifiers ever written into SQL text; nothing user-supplied is.

/// Tables of the sample store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// One row per stored sample: `id, metric_instance_id, timestamp, value`
    SampleValue,
    /// A series: `id, sample_name_id, label_set_id`
    MetricInstance,
    /// Metric names: `id, name`
    SampleName,
    /// Distinct label sets: `id`
    LabelSet,
    /// Label set contents: `label_set_id, label_key_id, label_value_id`
    LabelSetMembership,
    /// Label names: `id, name`
    LabelKey,
    /// Label values: `id, value`
    LabelValue,
}

impl Table {
    /// Get the table name
    pub fn name(&self) -> &'static str {
        match self {
            Self::SampleValue => "sample_value",
            Self::MetricInstance => "metric_instance",
            Self::SampleName => "sample_name",
            Self::LabelSet => "label_set",
            Self::LabelSetMembership => "label_set_membership",
            Self::LabelKey => "label_key",
            Self::LabelValue => "label_value",
        }
    }

    /// Alias used by the selector query
    pub fn alias(&self) -> &'static str {
        match self {
            Self::SampleValue => "sv",
            Self::MetricInstance => "mi",
            Self::SampleName => "sn",
            Self::LabelSet => "ls",
            Self::LabelSetMembership => "lsm",
            Self::LabelKey => "lk",
            Self::LabelValue => "lv",
        }
    }
}

/// Column carrying the rendered label set of every compiled vector.
pub const LABELS: &str = "labels";

/// Separator between `key=value` pairs in the `labels` column.
pub const LABEL_PAIR_SEPARATOR: &str = ",";

/// Name of the regular-expression predicate the engine must provide
/// (`X REGEXP Y` calls `regexp(Y, X)` on SQLite).
pub const REGEXP_OPERATOR: &str = "REGEXP";

/// Name of the regex substitution function `label_replace` relies on.
pub const REGEXP_REPLACE_FUNCTION: &str = "regexp_replace";

/// SQLite DDL for the schema, one statement per entry.
pub const SQLITE_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sample_name (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS label_key (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS label_value (
        id INTEGER PRIMARY KEY,
        value TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS label_set (
        id INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS label_set_membership (
        label_set_id INTEGER NOT NULL REFERENCES label_set(id),
        label_key_id INTEGER NOT NULL REFERENCES label_key(id),
        label_value_id INTEGER NOT NULL REFERENCES label_value(id),
        PRIMARY KEY (label_set_id, label_key_id)
    )",
    "CREATE TABLE IF NOT EXISTS metric_instance (
        id INTEGER PRIMARY KEY,
        sample_name_id INTEGER NOT NULL REFERENCES sample_name(id),
        label_set_id INTEGER NOT NULL REFERENCES label_set(id)
    )",
    "CREATE TABLE IF NOT EXISTS sample_value (
        id INTEGER PRIMARY KEY,
        metric_instance_id INTEGER NOT NULL REFERENCES metric_instance(id),
        timestamp INTEGER NOT NULL,
        value REAL NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sample_value_timestamp ON sample_value (timestamp)",
];
