//! Label manipulation functions
//!
//! Each function rewrites the `labels` column of its input. The input
//! becomes `label_input` and every step is one more `label_stage_N` CTE, so
//! the SQL reads in the order the rewrite happens.

use tracing::trace;

use crate::error::CompileError;
use crate::labels::{LabelName, anchor_pattern, compile_regex};
use crate::schema::{LABELS, REGEXP_OPERATOR, REGEXP_REPLACE_FUNCTION};
use crate::sql::{SqlBuilder, SqlFragment};
use crate::transform::label_sql;

/// Behavior of `label_del` and `label_keep`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelOpsMode {
    /// Strip or keep the named pairs in the `labels` string
    #[default]
    Rewrite,
    /// `label_del` drops rows carrying any named key; `label_keep` passes
    /// rows through unchanged
    Legacy,
}

/// Compiles label manipulation functions into SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelManipulationTransformer {
    mode: LabelOpsMode,
}

impl LabelManipulationTransformer {
    pub fn new(mode: LabelOpsMode) -> Self {
        Self { mode }
    }

    /// `label_set(input, key, value)`
    pub fn label_set(
        &self,
        input: &SqlFragment,
        key: &str,
        value: &str,
    ) -> Result<SqlFragment, CompileError> {
        let key = LabelName::new(key)?;
        label_sql::check_value(value)?;

        let mut chain = StageChain::new(input);
        chain.stage(|sql| {
            sql.push("timestamp, value, ");
            label_sql::push_set_value(sql, LABELS, &key, &|sql| {
                sql.bind(value);
            });
            sql.push(" AS labels");
        });
        Ok(chain.finish())
    }

    /// `label_del(input, keys...)`
    pub fn label_del(
        &self,
        input: &SqlFragment,
        keys: &[&str],
    ) -> Result<SqlFragment, CompileError> {
        let keys = label_names("label_del", keys)?;

        let mut chain = StageChain::new(input);
        match self.mode {
            LabelOpsMode::Rewrite => {
                for key in &keys {
                    chain.stage(|sql| {
                        sql.push("timestamp, value, ");
                        label_sql::push_remove_key(sql, LABELS, key);
                        sql.push(" AS labels");
                    });
                }
                Ok(chain.finish())
            }
            LabelOpsMode::Legacy => Ok(chain.finish_where(|sql| {
                sql.push("NOT (");
                sql.push_separated(&keys, " OR ", |sql, key| {
                    label_sql::push_has_key(sql, LABELS, key);
                });
                sql.push(")");
            })),
        }
    }

    /// `label_keep(input, keys...)`
    pub fn label_keep(
        &self,
        input: &SqlFragment,
        keys: &[&str],
    ) -> Result<SqlFragment, CompileError> {
        let mut keys = label_names("label_keep", keys)?;
        keys.sort();
        keys.dedup();

        let mut chain = StageChain::new(input);
        if self.mode == LabelOpsMode::Rewrite {
            chain.stage(|sql| {
                sql.push("timestamp, value, ");
                label_sql::push_keep_keys(sql, LABELS, &keys);
                sql.push(" AS labels");
            });
        }
        Ok(chain.finish())
    }

    /// `label_copy(input, src, dst)`: set `dst` to the value of `src` where
    /// `src` is present.
    pub fn label_copy(
        &self,
        input: &SqlFragment,
        src: &str,
        dst: &str,
    ) -> Result<SqlFragment, CompileError> {
        let src = LabelName::new(src)?;
        let dst = LabelName::new(dst)?;

        let mut chain = StageChain::new(input);
        push_copy(&mut chain, &src, &dst);
        Ok(chain.finish())
    }

    /// `label_move(input, src, dst)`: copy, then remove `src`.
    pub fn label_move(
        &self,
        input: &SqlFragment,
        src: &str,
        dst: &str,
    ) -> Result<SqlFragment, CompileError> {
        let src = LabelName::new(src)?;
        let dst = LabelName::new(dst)?;

        let mut chain = StageChain::new(input);
        if src != dst {
            push_copy(&mut chain, &src, &dst);
            chain.stage(|sql| {
                sql.push("timestamp, value, ");
                label_sql::push_remove_key(sql, LABELS, &src);
                sql.push(" AS labels");
            });
        }
        Ok(chain.finish())
    }

    /// `label_replace(input, dst, replacement, src, regex)`
    ///
    /// When the value of `src` (empty if absent) fully matches `regex`, `dst`
    /// is set to `regexp_replace(value, regex, replacement)`; other rows are
    /// unchanged.
    pub fn label_replace(
        &self,
        input: &SqlFragment,
        dst: &str,
        replacement: &str,
        src: &str,
        regex: &str,
    ) -> Result<SqlFragment, CompileError> {
        let dst = LabelName::new(dst)?;
        let src = LabelName::new(src)?;
        label_sql::check_value(replacement)?;
        let anchored = anchor_pattern(regex);
        compile_regex(regex)?;
        compile_regex(&anchored)?;

        let mut chain = StageChain::new(input);
        chain.stage(|sql| {
            sql.push("timestamp, value, labels, COALESCE(");
            label_sql::push_extract_value(sql, LABELS, &src);
            sql.push(", '') AS source_value");
        });
        chain.stage(|sql| {
            sql.push(&format!("timestamp, value, CASE WHEN source_value {REGEXP_OPERATOR} "))
                .bind(anchored.as_str())
                .push(" THEN ");
            label_sql::push_set_value(sql, LABELS, &dst, &|sql| {
                sql.push(&format!("{REGEXP_REPLACE_FUNCTION}(source_value, "))
                    .bind(anchored.as_str())
                    .push(", ")
                    .bind(replacement)
                    .push(")");
            });
            sql.push(" ELSE labels END AS labels");
        });
        Ok(chain.finish())
    }
}

fn label_names(function: &str, keys: &[&str]) -> Result<Vec<LabelName>, CompileError> {
    if keys.is_empty() {
        return Err(CompileError::InvalidArguments {
            function: function.to_string(),
            reason: "at least one label name is required".to_string(),
            usage: format!("{function}(http_requests_total, \"instance\")"),
        });
    }
    keys.iter()
        .map(|k| LabelName::new(k).map_err(CompileError::from))
        .collect()
}

fn push_copy(chain: &mut StageChain, src: &LabelName, dst: &LabelName) {
    chain.stage(|sql| {
        sql.push("timestamp, value, labels, ");
        label_sql::push_extract_value(sql, LABELS, src);
        sql.push(" AS copied_value");
    });
    chain.stage(|sql| {
        sql.push("timestamp, value, CASE WHEN copied_value IS NULL THEN labels ELSE ");
        label_sql::push_set_value(sql, LABELS, dst, &|sql| {
            sql.push("copied_value");
        });
        sql.push(" END AS labels");
    });
}

/// `WITH label_input AS (...), label_stage_1 AS (...), ...`
struct StageChain {
    sql: SqlBuilder,
    stages: usize,
}

impl StageChain {
    fn new(input: &SqlFragment) -> Self {
        let mut sql = SqlBuilder::new();
        sql.push("WITH label_input AS (").push_fragment(input).push(")");
        Self { sql, stages: 0 }
    }

    fn current(&self) -> String {
        if self.stages == 0 {
            "label_input".to_string()
        } else {
            format!("label_stage_{}", self.stages)
        }
    }

    /// Add a stage selecting the columns rendered by `columns` from the
    /// previous stage.
    fn stage(&mut self, columns: impl FnOnce(&mut SqlBuilder)) {
        let from = self.current();
        self.stages += 1;
        self.sql
            .push(&format!(", label_stage_{} AS (SELECT ", self.stages));
        columns(&mut self.sql);
        self.sql.push(&format!(" FROM {from})"));
    }

    fn finish(self) -> SqlFragment {
        self.finish_with(None::<fn(&mut SqlBuilder)>)
    }

    /// Finish, keeping only rows for which `filter` holds.
    fn finish_where(self, filter: impl FnOnce(&mut SqlBuilder)) -> SqlFragment {
        self.finish_with(Some(filter))
    }

    fn finish_with(mut self, filter: Option<impl FnOnce(&mut SqlBuilder)>) -> SqlFragment {
        let from = self.current();
        self.sql
            .push(&format!(" SELECT timestamp, value, labels FROM {from}"));
        if let Some(filter) = filter {
            self.sql.push(" WHERE ");
            filter(&mut self.sql);
        }
        self.sql.push(" ORDER BY timestamp, labels");

        let fragment = self.sql.build();
        trace!(
            sql = fragment.text(),
            stages = self.stages,
            "Compiled label function"
        );
        fragment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::sql::SqlValue;

    fn input() -> SqlFragment {
        SqlFragment::new(
            "SELECT timestamp, value, labels FROM t WHERE name = ?",
            vec!["up".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_label_set_binds_key_and_value() {
        let fragment = LabelManipulationTransformer::default()
            .label_set(&input(), "env", "prod")
            .unwrap();

        assert!(fragment.text().starts_with("WITH label_input AS (SELECT"));
        assert!(fragment.text().contains("label_stage_1 AS (SELECT timestamp, value, CASE WHEN"));
        assert!(fragment.text().ends_with("FROM label_stage_1 ORDER BY timestamp, labels"));
        assert!(!fragment.text().contains("prod"));
        assert_eq!(fragment.parameters()[0], SqlValue::from("up"));
        assert!(fragment.is_balanced());
    }

    #[test]
    fn test_label_names_are_validated() {
        let transformer = LabelManipulationTransformer::default();
        assert!(transformer.label_set(&input(), "bad-key", "x").is_err());
        assert!(transformer.label_copy(&input(), "src", "1dst").is_err());
        assert!(transformer.label_del(&input(), &["ok", "not ok"]).is_err());
        assert!(matches!(
            transformer.label_keep(&input(), &[]),
            Err(CompileError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_values_with_pair_separator_are_rejected() {
        let transformer = LabelManipulationTransformer::default();
        assert_eq!(
            transformer.label_set(&input(), "env", "prod,eu"),
            Err(CompileError::Validation(
                ValidationError::UnencodableLabelValue("prod,eu".to_string())
            ))
        );
        assert!(matches!(
            transformer.label_replace(&input(), "host", "$1,x", "instance", "(.*)"),
            Err(CompileError::Validation(
                ValidationError::UnencodableLabelValue(_)
            ))
        ));
        assert!(transformer.label_set(&input(), "env", "prod=eu").is_ok());
    }

    #[test]
    fn test_label_del_modes() {
        let rewrite = LabelManipulationTransformer::new(LabelOpsMode::Rewrite)
            .label_del(&input(), &["pod", "instance"])
            .unwrap();
        assert!(rewrite.text().contains("label_stage_2 AS (SELECT"));
        assert!(!rewrite.text().contains(" WHERE NOT ("));

        let legacy = LabelManipulationTransformer::new(LabelOpsMode::Legacy)
            .label_del(&input(), &["pod", "instance"])
            .unwrap();
        assert!(legacy.text().contains("FROM label_input WHERE NOT (INSTR("));
        assert!(legacy.text().contains(" > 0 OR INSTR("));
        assert!(legacy.is_balanced());
    }

    #[test]
    fn test_label_keep_modes() {
        let rewrite = LabelManipulationTransformer::new(LabelOpsMode::Rewrite)
            .label_keep(&input(), &["job", "env", "job"])
            .unwrap();
        // Sorted and deduplicated
        let keys: Vec<&SqlValue> = rewrite
            .parameters()
            .iter()
            .filter(|p| **p == SqlValue::from("env") || **p == SqlValue::from("job"))
            .collect();
        assert_eq!(keys.first(), Some(&&SqlValue::from("env")));
        assert!(rewrite.text().contains("TRIM(COALESCE(',' || ?"));

        let legacy = LabelManipulationTransformer::new(LabelOpsMode::Legacy)
            .label_keep(&input(), &["job"])
            .unwrap();
        assert_eq!(
            legacy.text(),
            "WITH label_input AS (SELECT timestamp, value, labels FROM t WHERE name = ?) \
             SELECT timestamp, value, labels FROM label_input ORDER BY timestamp, labels"
        );
    }

    #[test]
    fn test_label_move_onto_itself_is_noop() {
        let fragment = LabelManipulationTransformer::default()
            .label_move(&input(), "job", "job")
            .unwrap();
        assert!(!fragment.text().contains("label_stage_"));

        let moved = LabelManipulationTransformer::default()
            .label_move(&input(), "job", "service")
            .unwrap();
        assert!(moved.text().contains("AS copied_value FROM label_input"));
        assert!(moved.text().contains("label_stage_3"));
    }

    #[test]
    fn test_label_replace_validates_regex_and_anchors() {
        let transformer = LabelManipulationTransformer::default();
        assert!(matches!(
            transformer.label_replace(&input(), "dst", "$1", "src", "(unclosed"),
            Err(CompileError::Validation(_))
        ));

        let fragment = transformer
            .label_replace(&input(), "host", "$1", "instance", "(.*):.*")
            .unwrap();
        assert!(fragment.text().contains("source_value REGEXP ?"));
        assert!(fragment.text().contains("regexp_replace(source_value, ?, ?)"));
        assert!(fragment.parameters().contains(&SqlValue::from("^(?:(.*):.*)$")));
        assert!(fragment.parameters().contains(&SqlValue::from("$1")));
        assert!(fragment.is_balanced());
    }
}
