//! Aggregation across series
//!
//! Two input shapes are handled:
//!
//! - a plain selector (no window): the selector's CTEs are reused directly,
//!   and canonical grouping reads label values from the label tables through
//!   `label_set_id`
//! - any other compiled expression: it becomes the `aggregation_input` CTE,
//!   rows are grouped per timestamp, and canonical grouping reads label
//!   values out of the `labels` string
//!
//! Canonical grouping renders the group as `name=value` pairs in the order
//! the labels were requested, with absent labels as `name=`.

use tracing::trace;

use crate::error::CompileError;
use crate::labels::LabelName;
use crate::schema::{LABELS, Table};
use crate::sql::{SqlBuilder, SqlFragment};
use crate::transform::label_sql;
use crate::transform::selector::{LABELED_SAMPLES, SelectorTransformer};
use crate::types::{AggregationSpec, GroupingModifier, Selector};

const AGGREGATION_INPUT: &str = "aggregation_input";
const GROUPED_SAMPLES: &str = "grouped_samples";

/// Compiles [`AggregationSpec`]s into SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregationTransformer {
    selector: SelectorTransformer,
}

/// How rows of the input are partitioned
enum Grouping<'a> {
    All,
    LabelString,
    Canonical(&'a [LabelName]),
}

impl AggregationTransformer {
    pub fn new(selector: SelectorTransformer) -> Self {
        Self { selector }
    }

    /// Aggregate the samples of `selector` at the latest snapshot.
    pub fn transform_selector(
        &self,
        spec: &AggregationSpec,
        selector: &Selector,
    ) -> Result<SqlFragment, CompileError> {
        if selector.window.is_some() {
            let input = self.selector.transform(selector);
            return self.transform_fragment(spec, &input);
        }

        let grouping = grouping(spec)?;
        let function = spec.kind.sql_function();

        let mut sql = SqlBuilder::new();
        sql.push("WITH ").push_fragment(&self.selector.ctes(selector));

        match grouping {
            Grouping::All => {
                sql.push(&format!(
                    " SELECT MAX(timestamp) AS timestamp, {function}(value) AS value, '' AS labels \
                     FROM {LABELED_SAMPLES} HAVING COUNT(*) > 0"
                ));
            }
            Grouping::LabelString => {
                sql.push(&format!(
                    " SELECT MAX(timestamp) AS timestamp, {function}(value) AS value, labels \
                     FROM {LABELED_SAMPLES} GROUP BY labels ORDER BY labels"
                ));
            }
            Grouping::Canonical(labels) => {
                sql.push(&format!(", {GROUPED_SAMPLES} AS (SELECT timestamp, value, "));
                sql.push_separated(labels, " || ',' || ", push_label_lookup);
                sql.push(&format!(
                    " AS group_labels FROM {LABELED_SAMPLES}) \
                     SELECT MAX(timestamp) AS timestamp, {function}(value) AS value, \
                     group_labels AS labels \
                     FROM {GROUPED_SAMPLES} GROUP BY group_labels ORDER BY labels"
                ));
            }
        }

        let fragment = sql.build();
        trace!(
            sql = fragment.text(),
            "Compiled {} over selector",
            spec.kind
        );
        Ok(fragment)
    }

    /// Aggregate an already compiled vector expression, per timestamp.
    pub fn transform_fragment(
        &self,
        spec: &AggregationSpec,
        input: &SqlFragment,
    ) -> Result<SqlFragment, CompileError> {
        let grouping = grouping(spec)?;
        let function = spec.kind.sql_function();

        let mut sql = SqlBuilder::new();
        sql.push(&format!("WITH {AGGREGATION_INPUT} AS ("))
            .push_fragment(input)
            .push(")");

        match grouping {
            Grouping::All => {
                sql.push(&format!(
                    " SELECT timestamp, {function}(value) AS value, '' AS labels \
                     FROM {AGGREGATION_INPUT} GROUP BY timestamp ORDER BY timestamp"
                ));
            }
            Grouping::LabelString => {
                sql.push(&format!(
                    " SELECT timestamp, {function}(value) AS value, labels \
                     FROM {AGGREGATION_INPUT} GROUP BY timestamp, labels ORDER BY timestamp, labels"
                ));
            }
            Grouping::Canonical(labels) => {
                sql.push(&format!(", {GROUPED_SAMPLES} AS (SELECT timestamp, value, "));
                label_sql::push_canonical_group(&mut sql, LABELS, labels);
                sql.push(&format!(
                    " AS group_labels FROM {AGGREGATION_INPUT}) \
                     SELECT timestamp, {function}(value) AS value, group_labels AS labels \
                     FROM {GROUPED_SAMPLES} GROUP BY timestamp, group_labels \
                     ORDER BY timestamp, labels"
                ));
            }
        }

        let fragment = sql.build();
        trace!(
            sql = fragment.text(),
            "Compiled {} over expression",
            spec.kind
        );
        Ok(fragment)
    }
}

fn grouping(spec: &AggregationSpec) -> Result<Grouping<'_>, CompileError> {
    match &spec.modifier {
        GroupingModifier::None => Ok(Grouping::All),
        GroupingModifier::Without(_) => Err(CompileError::UnsupportedModifier {
            modifier: "without".to_string(),
            alternative: "by".to_string(),
        }),
        GroupingModifier::By(labels) if labels.is_empty() || !spec.canonical => {
            Ok(Grouping::LabelString)
        }
        GroupingModifier::By(labels) => Ok(Grouping::Canonical(labels)),
    }
}

/// `? || '=' || COALESCE((SELECT value of label ? for this label set), '')`
fn push_label_lookup(sql: &mut SqlBuilder, label: &LabelName) {
    sql.bind(label.as_str())
        .push(&format!(
            " || '=' || COALESCE((SELECT g_lv.value FROM {} g_lsm \
             JOIN {} g_lk ON g_lk.id = g_lsm.label_key_id \
             JOIN {} g_lv ON g_lv.id = g_lsm.label_value_id \
             WHERE g_lsm.label_set_id = {LABELED_SAMPLES}.label_set_id AND g_lk.name = ",
            Table::LabelSetMembership.name(),
            Table::LabelKey.name(),
            Table::LabelValue.name(),
        ))
        .bind(label.as_str())
        .push(" LIMIT 1), '')");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelMatcher;
    use crate::sql::SqlValue;
    use crate::types::{AggregationKind, TimeWindow};

    fn selector() -> Selector {
        Selector::new("http_requests_total")
            .unwrap()
            .with_matcher(LabelMatcher::equal("method", "GET").unwrap())
    }

    fn by(labels: &[&str], canonical: bool) -> AggregationSpec {
        AggregationSpec::new(
            AggregationKind::Sum,
            GroupingModifier::by(labels).unwrap(),
            canonical,
        )
        .unwrap()
    }

    #[test]
    fn test_aggregate_everything() {
        let spec = AggregationSpec::new(AggregationKind::Avg, GroupingModifier::None, true)
            .unwrap();
        let fragment = AggregationTransformer::default()
            .transform_selector(&spec, &selector())
            .unwrap();

        assert!(fragment.text().contains("AVG(value) AS value, '' AS labels"));
        assert!(fragment.text().ends_with("HAVING COUNT(*) > 0"));
        assert_eq!(fragment.parameters().len(), 3);
    }

    #[test]
    fn test_canonical_grouping_looks_up_label_values() {
        let fragment = AggregationTransformer::default()
            .transform_selector(&by(&["region", "job"], true), &selector())
            .unwrap();
        let text = fragment.text();

        assert!(text.contains(
            "grouped_samples AS (SELECT timestamp, value, ? || '=' || COALESCE((SELECT g_lv.value"
        ));
        assert!(text.contains("g_lsm.label_set_id = labeled_samples.label_set_id"));
        assert!(text.contains("LIMIT 1), '') || ',' || ?"));
        assert!(text.contains("GROUP BY group_labels"));
        assert_eq!(
            &fragment.parameters()[3..],
            &[
                SqlValue::from("region"),
                SqlValue::from("region"),
                SqlValue::from("job"),
                SqlValue::from("job"),
            ]
        );
        assert!(fragment.is_balanced());
    }

    #[test]
    fn test_legacy_grouping_uses_label_string() {
        let fragment = AggregationTransformer::default()
            .transform_selector(&by(&["region"], false), &selector())
            .unwrap();
        assert!(fragment.text().contains("GROUP BY labels"));
        assert!(!fragment.text().contains("group_labels"));
        assert_eq!(fragment.parameters().len(), 3);
    }

    #[test]
    fn test_without_is_rejected() {
        let spec = AggregationSpec::new(
            AggregationKind::Sum,
            GroupingModifier::without(&["pod"]).unwrap(),
            true,
        )
        .unwrap();
        let err = AggregationTransformer::default()
            .transform_selector(&spec, &selector())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Aggregation modifier 'without' is not yet implemented; use by instead"
        );
    }

    #[test]
    fn test_aggregate_over_fragment_groups_per_timestamp() {
        let input = SelectorTransformer::default()
            .transform(&selector().with_window(TimeWindow::parse("5m").unwrap()));
        let transformer = AggregationTransformer::default();

        let canonical = transformer.transform_fragment(&by(&["job"], true), &input).unwrap();
        assert!(canonical.text().starts_with("WITH aggregation_input AS (WITH time_window"));
        assert!(canonical.text().contains("GROUP BY timestamp, group_labels"));
        assert!(canonical.is_balanced());

        let legacy = transformer.transform_fragment(&by(&["job"], false), &input).unwrap();
        assert!(legacy.text().contains("GROUP BY timestamp, labels"));
    }

    #[test]
    fn test_stddev_maps_to_stddev() {
        let spec = AggregationSpec::new(
            AggregationKind::from_operator("stdvar").unwrap(),
            GroupingModifier::None,
            true,
        )
        .unwrap();
        let fragment = AggregationTransformer::default()
            .transform_selector(&spec, &selector())
            .unwrap();
        assert!(fragment.text().contains("STDDEV(value)"));
    }
}
