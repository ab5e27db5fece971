//! Rollup functions over windowed samples
//!
//! The selector's CTEs are reused directly, so `time_window` stays in scope,
//! and its samples are exposed as `windowed_samples`. Each rollup layers its
//! own CTEs on top:
//!
//! - `rate`: per-row LAG over each series, yielding per-second rates
//! - `increase`: summed per-row deltas, one row per series
//! - `*_over_time`: plain SQL aggregates, one row per series
//! - `quantile_over_time`: PERCENT_RANK over each series' values
//!
//! Every rollup yielding one row per series stamps it with the window's end,
//! so series with different last samples still line up for aggregation.
//! Counter resets (`value < prev_value`) count the new value as the delta.

use tracing::trace;

use crate::sql::{SqlBuilder, SqlFragment};
use crate::transform::selector::{LABELED_SAMPLES, SelectorTransformer};
use crate::types::{RollupKind, RollupSpec};

const WINDOWED_SAMPLES: &str = "windowed_samples";

/// End of the rollup window, shared by every series.
const WINDOW_END: &str = "(SELECT max_ts FROM time_window)";

/// Milliseconds between a row and its predecessor, as seconds.
const ELAPSED_SECONDS: &str = "((timestamp - prev_timestamp) / 1000.0)";

/// Compiles [`RollupSpec`]s into SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollupTransformer {
    selector: SelectorTransformer,
}

impl RollupTransformer {
    pub fn new(selector: SelectorTransformer) -> Self {
        Self { selector }
    }

    pub fn transform(&self, spec: &RollupSpec) -> SqlFragment {
        let mut sql = SqlBuilder::new();
        sql.push("WITH ")
            .push_fragment(&self.selector.ctes(spec.selector()))
            .push(&format!(
                ", {WINDOWED_SAMPLES} AS (SELECT timestamp, value, labels FROM {LABELED_SAMPLES})"
            ));

        match spec.kind() {
            RollupKind::Rate => push_rate(&mut sql),
            RollupKind::Increase => push_increase(&mut sql),
            RollupKind::AvgOverTime => push_over_time(&mut sql, "AVG(value)"),
            RollupKind::SumOverTime => push_over_time(&mut sql, "SUM(value)"),
            RollupKind::MinOverTime => push_over_time(&mut sql, "MIN(value)"),
            RollupKind::MaxOverTime => push_over_time(&mut sql, "MAX(value)"),
            RollupKind::CountOverTime => push_over_time(&mut sql, "COUNT(*)"),
            RollupKind::QuantileOverTime => {
                // RollupSpec guarantees presence for this kind
                push_quantile(&mut sql, spec.quantile().unwrap_or(1.0))
            }
        }

        let fragment = sql.build();
        trace!(sql = fragment.text(), "Compiled {}", spec.kind());
        fragment
    }
}

fn push_lagged(sql: &mut SqlBuilder) {
    sql.push(&format!(
        ", lagged_samples AS (SELECT timestamp, value, labels, \
         LAG(value) OVER (PARTITION BY labels ORDER BY timestamp) AS prev_value, \
         LAG(timestamp) OVER (PARTITION BY labels ORDER BY timestamp) AS prev_timestamp \
         FROM {WINDOWED_SAMPLES})"
    ));
}

fn push_rate(sql: &mut SqlBuilder) {
    push_lagged(sql);
    sql.push(&format!(
        " SELECT timestamp, \
         CASE WHEN timestamp = prev_timestamp THEN 0.0 \
         WHEN value < prev_value THEN value / {ELAPSED_SECONDS} \
         ELSE (value - prev_value) / {ELAPSED_SECONDS} END AS value, \
         labels FROM lagged_samples WHERE prev_value IS NOT NULL \
         ORDER BY timestamp, labels"
    ));
}

fn push_increase(sql: &mut SqlBuilder) {
    push_lagged(sql);
    sql.push(&format!(
        " SELECT {WINDOW_END} AS timestamp, \
         SUM(CASE WHEN prev_value IS NULL THEN 0.0 \
         WHEN value < prev_value THEN value \
         ELSE value - prev_value END) AS value, \
         labels FROM lagged_samples GROUP BY labels \
         ORDER BY timestamp, labels"
    ));
}

fn push_over_time(sql: &mut SqlBuilder, aggregate: &str) {
    sql.push(&format!(
        " SELECT {WINDOW_END} AS timestamp, {aggregate} AS value, labels \
         FROM {WINDOWED_SAMPLES} GROUP BY labels ORDER BY timestamp, labels"
    ));
}

/// Smallest value whose percent rank reaches `q`, falling back to the
/// series maximum when ties keep every rank below `q`.
fn push_quantile(sql: &mut SqlBuilder, quantile: f64) {
    sql.push(&format!(
        ", ranked_samples AS (SELECT timestamp, value, labels, \
         PERCENT_RANK() OVER (PARTITION BY labels ORDER BY value) AS pct_rank \
         FROM {WINDOWED_SAMPLES}) \
         SELECT {WINDOW_END} AS timestamp, \
         COALESCE(MIN(CASE WHEN pct_rank >= "
    ))
    .bind(quantile)
    .push(
        " THEN value END), MAX(value)) AS value, labels \
         FROM ranked_samples GROUP BY labels ORDER BY timestamp, labels",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqlValue;
    use crate::types::{Selector, TimeWindow};

    fn spec(kind: RollupKind, quantile: Option<f64>) -> RollupSpec {
        let selector = Selector::new("http_requests_total")
            .unwrap()
            .with_window(TimeWindow::parse("5m").unwrap());
        RollupSpec::new(kind, selector, quantile).unwrap()
    }

    #[test]
    fn test_rate_uses_lag_and_handles_resets() {
        let fragment = RollupTransformer::default().transform(&spec(RollupKind::Rate, None));
        let text = fragment.text();

        assert!(text.starts_with("WITH time_window AS"));
        assert!(text.contains(
            ", windowed_samples AS (SELECT timestamp, value, labels FROM labeled_samples)"
        ));
        assert!(text.contains("LAG(value) OVER (PARTITION BY labels ORDER BY timestamp)"));
        assert!(text.contains(
            "WHEN value < prev_value THEN value / ((timestamp - prev_timestamp) / 1000.0)"
        ));
        assert!(text.contains("WHERE prev_value IS NOT NULL"));
        assert!(text.ends_with("ORDER BY timestamp, labels"));
        assert!(fragment.is_balanced());
    }

    #[test]
    fn test_increase_sums_deltas_per_series() {
        let fragment = RollupTransformer::default().transform(&spec(RollupKind::Increase, None));
        assert!(fragment.text().contains("SUM(CASE WHEN prev_value IS NULL THEN 0.0"));
        assert!(fragment.text().contains("GROUP BY labels"));
        assert!(
            fragment
                .text()
                .contains("SELECT (SELECT max_ts FROM time_window) AS timestamp")
        );
    }

    #[test]
    fn test_over_time_aggregates() {
        let transformer = RollupTransformer::default();
        for (kind, aggregate) in [
            (RollupKind::AvgOverTime, "AVG(value) AS value"),
            (RollupKind::SumOverTime, "SUM(value) AS value"),
            (RollupKind::MinOverTime, "MIN(value) AS value"),
            (RollupKind::MaxOverTime, "MAX(value) AS value"),
            (RollupKind::CountOverTime, "COUNT(*) AS value"),
        ] {
            let fragment = transformer.transform(&spec(kind, None));
            assert!(fragment.text().contains(aggregate), "{kind}");
            assert!(
                fragment
                    .text()
                    .contains("(SELECT max_ts FROM time_window) AS timestamp")
            );
        }
    }

    #[test]
    fn test_quantile_is_bound_last() {
        let fragment = RollupTransformer::default()
            .transform(&spec(RollupKind::QuantileOverTime, Some(0.95)));

        let rank = "PERCENT_RANK() OVER (PARTITION BY labels ORDER BY value)";
        assert!(fragment.text().contains(rank));
        assert_eq!(fragment.parameters().last(), Some(&SqlValue::Real(0.95)));
        assert!(fragment.is_balanced());
    }
}
