//! SQL expressions over the `labels` string column
//!
//! `labels` holds `key=value` pairs joined with `,`, sorted by key, e.g.
//! `job=api,method=GET`. Every helper pads the column as `,labels,` so that
//! `,key=` only ever matches at a pair boundary. Keys are always bound
//! parameters; `column` is a trusted identifier.
//!
//! Values containing `,` are not representable in this encoding; literal
//! values written into it go through [`check_value`] first.

use crate::error::ValidationError;
use crate::labels::LabelName;
use crate::schema::LABEL_PAIR_SEPARATOR;
use crate::sql::SqlBuilder;

/// Reject a literal value the `labels` encoding cannot carry.
pub(crate) fn check_value(value: &str) -> Result<(), ValidationError> {
    if value.contains(LABEL_PAIR_SEPARATOR) {
        return Err(ValidationError::UnencodableLabelValue(value.to_string()));
    }
    Ok(())
}

fn padded(column: &str) -> String {
    format!("(',' || {column} || ',')")
}

/// `INSTR(padded, ',key=')`: 1-based position of the pair's leading comma, 0 if absent
fn push_key_position(sql: &mut SqlBuilder, column: &str, key: &LabelName) {
    sql.push(&format!("INSTR({}, ',' || ", padded(column)))
        .bind(key.as_str())
        .push(" || '=')");
}

/// Position of the first character of the value of `key`
fn push_value_start(sql: &mut SqlBuilder, column: &str, key: &LabelName) {
    push_key_position(sql, column, key);
    sql.push(" + LENGTH(").bind(key.as_str()).push(") + 2");
}

/// Position just past the value of `key`, i.e. the comma that ends its pair
fn push_pair_end(sql: &mut SqlBuilder, column: &str, key: &LabelName) {
    push_key_position(sql, column, key);
    sql.push(&format!(" + INSTR(SUBSTR({}, ", padded(column)));
    push_key_position(sql, column, key);
    sql.push(" + 1), ',')");
}

/// Value of `key`, or NULL when the key is absent.
pub(crate) fn push_extract_value(sql: &mut SqlBuilder, column: &str, key: &LabelName) {
    let padded = padded(column);
    sql.push("CASE WHEN ");
    push_key_position(sql, column, key);
    sql.push(&format!(" = 0 THEN NULL ELSE SUBSTR({padded}, "));
    push_value_start(sql, column, key);
    sql.push(&format!(", INSTR(SUBSTR({padded}, "));
    push_value_start(sql, column, key);
    sql.push("), ',') - 1) END");
}

/// Whether `key` is present.
pub(crate) fn push_has_key(sql: &mut SqlBuilder, column: &str, key: &LabelName) {
    push_key_position(sql, column, key);
    sql.push(" > 0");
}

/// `labels` with `key` set to the SQL expression rendered by `value`.
///
/// An existing pair is replaced in place; otherwise the pair is appended.
/// `value` is rendered twice.
pub(crate) fn push_set_value(
    sql: &mut SqlBuilder,
    column: &str,
    key: &LabelName,
    value: &dyn Fn(&mut SqlBuilder),
) {
    let padded = padded(column);
    sql.push("CASE WHEN ");
    push_key_position(sql, column, key);
    sql.push(&format!(" = 0 THEN TRIM({padded} || "))
        .bind(key.as_str())
        .push(" || '=' || ");
    value(sql);
    sql.push(&format!(", ',') ELSE TRIM(SUBSTR({padded}, 1, "));
    push_key_position(sql, column, key);
    sql.push(") || ").bind(key.as_str()).push(" || '=' || ");
    value(sql);
    sql.push(&format!(" || SUBSTR({padded}, "));
    push_pair_end(sql, column, key);
    sql.push("), ',') END");
}

/// `labels` without the pair for `key`.
pub(crate) fn push_remove_key(sql: &mut SqlBuilder, column: &str, key: &LabelName) {
    let padded = padded(column);
    sql.push("CASE WHEN ");
    push_key_position(sql, column, key);
    sql.push(&format!(" = 0 THEN {column} ELSE TRIM(SUBSTR({padded}, 1, "));
    push_key_position(sql, column, key);
    sql.push(&format!(" - 1) || SUBSTR({padded}, "));
    push_pair_end(sql, column, key);
    sql.push("), ',') END");
}

/// `labels` rebuilt from `keys` only. Absent keys are skipped; pass `keys`
/// sorted to keep the result sorted.
pub(crate) fn push_keep_keys(sql: &mut SqlBuilder, column: &str, keys: &[LabelName]) {
    sql.push("TRIM(");
    sql.push_separated(keys, " || ", |sql, key| {
        sql.push("COALESCE(',' || ").bind(key.as_str()).push(" || '=' || ");
        push_extract_value(sql, column, key);
        sql.push(", '')");
    });
    sql.push(", ',')");
}

/// Group key `k1=v1,k2=v2` in caller order; absent keys render as `k=`.
pub(crate) fn push_canonical_group(sql: &mut SqlBuilder, column: &str, keys: &[LabelName]) {
    sql.push_separated(keys, " || ',' || ", |sql, key| {
        sql.bind(key.as_str()).push(" || '=' || COALESCE(");
        push_extract_value(sql, column, key);
        sql.push(", '')");
    });
}
