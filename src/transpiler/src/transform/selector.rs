//! Selector compilation
//!
//! A selector resolves to the `labeled_samples` CTE: one row per sample of
//! the named metric that passes every label matcher, with its full label set
//! rendered into the `labels` column.

use tracing::trace;

use crate::labels::RegexSemantics;
use crate::schema::{LABEL_PAIR_SEPARATOR, Table};
use crate::sql::{SqlBuilder, SqlFragment};
use crate::types::{Selector, TimeWindow};

/// Name of the CTE carrying the selected samples.
pub const LABELED_SAMPLES: &str = "labeled_samples";

/// Compiles [`Selector`]s into SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorTransformer {
    regex_semantics: RegexSemantics,
}

impl SelectorTransformer {
    pub fn new(regex_semantics: RegexSemantics) -> Self {
        Self { regex_semantics }
    }

    /// Full statement returning `timestamp, value, labels`.
    ///
    /// Without a window only the latest snapshot is returned, ordered by
    /// `labels`; with a window every sample in range, ordered by
    /// `(timestamp, labels)`.
    pub fn transform(&self, selector: &Selector) -> SqlFragment {
        let order_by = if selector.window.is_some() {
            "timestamp, labels"
        } else {
            "labels"
        };

        let mut sql = SqlBuilder::new();
        sql.push("WITH ")
            .push_fragment(&self.ctes(selector))
            .push(&format!(
                " SELECT timestamp, value, labels FROM {LABELED_SAMPLES} ORDER BY {order_by}"
            ));
        let fragment = sql.build();
        trace!(sql = fragment.text(), "Compiled selector {selector}");
        fragment
    }

    /// The CTE list (without `WITH`) ending in `labeled_samples`, which
    /// exposes `sample_id, timestamp, value, label_set_id, labels`.
    pub fn ctes(&self, selector: &Selector) -> SqlFragment {
        let mut sql = SqlBuilder::new();
        let bound = match selector.window {
            Some(window) => {
                push_time_window(&mut sql, &window);
                "time_window"
            }
            None => {
                sql.push(&format!(
                    "latest_snapshot AS (SELECT MAX(timestamp) AS max_ts FROM {})",
                    Table::SampleValue.name()
                ));
                "latest_snapshot"
            }
        };

        let sv = Table::SampleValue.alias();
        let mi = Table::MetricInstance.alias();
        let sn = Table::SampleName.alias();
        let ls = Table::LabelSet.alias();
        let lsm = Table::LabelSetMembership.alias();
        let lk = Table::LabelKey.alias();
        let lv = Table::LabelValue.alias();

        sql.push(&format!(
            ", {LABELED_SAMPLES} AS (SELECT {sv}.id AS sample_id, {sv}.timestamp AS timestamp, \
             {sv}.value AS value, {mi}.label_set_id AS label_set_id, \
             COALESCE(GROUP_CONCAT({lk}.name || '=' || {lv}.value, '{LABEL_PAIR_SEPARATOR}' \
             ORDER BY {lk}.name), '') AS labels \
             FROM {} {sv} \
             JOIN {} {mi} ON {mi}.id = {sv}.metric_instance_id \
             JOIN {} {sn} ON {sn}.id = {mi}.sample_name_id \
             JOIN {} {ls} ON {ls}.id = {mi}.label_set_id \
             LEFT JOIN {} {lsm} ON {lsm}.label_set_id = {ls}.id \
             LEFT JOIN {} {lk} ON {lk}.id = {lsm}.label_key_id \
             LEFT JOIN {} {lv} ON {lv}.id = {lsm}.label_value_id \
             CROSS JOIN {bound} \
             WHERE {sn}.name = ",
            Table::SampleValue.name(),
            Table::MetricInstance.name(),
            Table::SampleName.name(),
            Table::LabelSet.name(),
            Table::LabelSetMembership.name(),
            Table::LabelKey.name(),
            Table::LabelValue.name(),
        ))
        .bind(selector.metric.as_str());

        if selector.window.is_some() {
            sql.push(&format!(
                " AND {sv}.timestamp BETWEEN {bound}.min_ts AND {bound}.max_ts"
            ));
        } else {
            sql.push(&format!(" AND {sv}.timestamp = {bound}.max_ts"));
        }

        for matcher in &selector.matchers {
            sql.push(" AND ")
                .push_fragment(&matcher.to_sql_with(self.regex_semantics));
        }

        sql.push(&format!(" GROUP BY {sv}.id)"));
        sql.build()
    }
}

fn push_time_window(sql: &mut SqlBuilder, window: &TimeWindow) {
    match (window.max_timestamp_ms(), window.min_timestamp_ms()) {
        (Some(max), Some(min)) => {
            sql.push("time_window AS (SELECT ")
                .bind(max)
                .push(" AS max_ts, ")
                .bind(min)
                .push(" AS min_ts)");
        }
        _ => {
            sql.push("time_window AS (SELECT MAX(timestamp) AS max_ts, MAX(timestamp) - ")
                .bind(window.duration_ms_i64())
                .push(&format!(" AS min_ts FROM {})", Table::SampleValue.name()));
        }
    }
}
