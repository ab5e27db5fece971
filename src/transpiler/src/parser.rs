//! Query text frontend
//!
//! Parses MetricsQL text with the promql-parser crate and lowers its AST into
//! the typed [`Expr`] tree. Only constructs the transformers understand
//! survive lowering; everything else is reported as unsupported here, before
//! any SQL is produced.
//!
//! The parser only accepts functions known to PromQL. MetricsQL-only label
//! functions (`label_set`, `label_del`, `label_keep`, `label_copy`,
//! `label_move`) are reachable by building the [`Expr`] tree directly.

use std::time::Duration;

use promql_parser::label::{MatchOp, Matcher};
use promql_parser::parser::{
    self, Expr as PromExpr, LabelModifier, VectorMatchCardinality, VectorSelector,
};
use tracing::debug;

use crate::error::{CompileError, TranspileError};
use crate::expr::Expr;
use crate::labels::{LabelMatcher, MatchKind};
use crate::types::{ComparisonMode, GroupingModifier, Selector, TimeWindow};

const METRIC_NAME_LABEL: &str = "__name__";

/// Parse query text into an expression tree.
///
/// # Examples
/// ```
/// use transpiler::parser::parse;
///
/// let expr = parse("sum by (job) (rate(http_requests_total[5m]))").unwrap();
/// assert_eq!(expr.metric_names(), vec!["http_requests_total"]);
/// ```
pub fn parse(query: &str) -> Result<Expr, TranspileError> {
    let ast = parser::parse(query).map_err(|e| TranspileError::from_parser_message(&e))?;
    let expr = lower(&ast)?;
    debug!(metrics = ?expr.metric_names(), "Parsed query");
    Ok(expr)
}

fn unsupported(feature: &str) -> TranspileError {
    CompileError::UnsupportedFeature(feature.to_string()).into()
}

/// Lower a promql-parser expression.
pub fn lower(expr: &PromExpr) -> Result<Expr, TranspileError> {
    match expr {
        PromExpr::VectorSelector(vs) => Ok(Expr::Selector(lower_selector(vs, None)?)),
        PromExpr::MatrixSelector(ms) => Ok(Expr::Selector(lower_selector(&ms.vs, Some(ms.range))?)),
        PromExpr::Paren(paren) => Ok(Expr::paren(lower(&paren.expr)?)),
        PromExpr::NumberLiteral(number) => Ok(Expr::NumberLiteral(number.val)),
        PromExpr::StringLiteral(string) => Ok(Expr::StringLiteral(string.val.clone())),
        PromExpr::Call(call) => {
            let args = call
                .args
                .args
                .iter()
                .map(|arg| lower(arg))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::call(call.func.name, args))
        }
        PromExpr::Aggregate(agg) => {
            let op = agg.op.to_string().to_lowercase();
            if agg.param.is_some() {
                return Err(CompileError::UnsupportedFunction(op).into());
            }
            let modifier = match &agg.modifier {
                None => GroupingModifier::None,
                Some(LabelModifier::Include(labels)) if labels.labels.is_empty() => {
                    GroupingModifier::None
                }
                Some(LabelModifier::Include(labels)) => {
                    let names: Vec<&str> = labels.labels.iter().map(String::as_str).collect();
                    GroupingModifier::by(&names)?
                }
                Some(LabelModifier::Exclude(labels)) => {
                    let names: Vec<&str> = labels.labels.iter().map(String::as_str).collect();
                    GroupingModifier::without(&names)?
                }
            };
            Ok(Expr::aggregate(&op, lower(&agg.expr)?, modifier))
        }
        PromExpr::Binary(binary) => {
            let mut comparison = ComparisonMode::Filter;
            if let Some(modifier) = &binary.modifier {
                if matches!(
                    modifier.card,
                    VectorMatchCardinality::ManyToOne(_) | VectorMatchCardinality::OneToMany(_)
                ) {
                    return Err(unsupported("group_left/group_right vector matching"));
                }
                match &modifier.matching {
                    None => {}
                    Some(LabelModifier::Exclude(labels)) if labels.labels.is_empty() => {}
                    Some(LabelModifier::Include(_)) => {
                        return Err(unsupported("on(...) vector matching"));
                    }
                    Some(LabelModifier::Exclude(_)) => {
                        return Err(unsupported("ignoring(...) vector matching"));
                    }
                }
                if modifier.return_bool {
                    comparison = ComparisonMode::Bool;
                }
            }

            let op = binary.op.to_string().to_lowercase();
            let left = lower(&binary.lhs)?;
            let right = lower(&binary.rhs)?;
            Ok(match comparison {
                ComparisonMode::Bool => Expr::binary(&op, left, right),
                ComparisonMode::Filter => Expr::filter(&op, left, right),
            })
        }
        PromExpr::Unary(unary) => {
            let inner = lower(&unary.expr)?;
            Ok(Expr::binary("*", inner, Expr::NumberLiteral(-1.0)))
        }
        PromExpr::Subquery(_) => Err(unsupported("subqueries")),
        PromExpr::Extension(_) => Err(unsupported("extension expressions")),
    }
}

fn lower_selector(
    vs: &VectorSelector,
    range: Option<Duration>,
) -> Result<Selector, TranspileError> {
    if vs.offset.is_some() {
        return Err(unsupported("offset modifier"));
    }
    if vs.at.is_some() {
        return Err(unsupported("@ modifier"));
    }
    if !vs.matchers.or_matchers.is_empty() {
        return Err(unsupported("'or' between label matchers"));
    }

    let name = metric_name(vs).ok_or_else(|| unsupported("selectors without a metric name"))?;
    let mut selector = Selector::new(name)?;

    for matcher in &vs.matchers.matchers {
        if matcher.name == METRIC_NAME_LABEL {
            if matches!(matcher.op, MatchOp::Equal) && matcher.value == name {
                continue;
            }
            return Err(unsupported("matching on __name__ other than by equality"));
        }
        selector = selector.with_matcher(lower_matcher(matcher)?);
    }

    // A zero range falls back to the latest snapshot
    if let Some(range) = range.filter(|r| !r.is_zero()) {
        selector = selector.with_window(TimeWindow::from_duration(range)?);
    }

    Ok(selector)
}

/// Metric name from the selector, or from an equality matcher on `__name__`
fn metric_name(vs: &VectorSelector) -> Option<&str> {
    vs.name.as_deref().or_else(|| {
        vs.matchers
            .matchers
            .iter()
            .find(|m| m.name == METRIC_NAME_LABEL && matches!(m.op, MatchOp::Equal))
            .map(|m| m.value.as_str())
    })
}

fn lower_matcher(matcher: &Matcher) -> Result<LabelMatcher, TranspileError> {
    let kind = match &matcher.op {
        MatchOp::Equal => MatchKind::Equal,
        MatchOp::NotEqual => MatchKind::NotEqual,
        MatchOp::Re(_) => MatchKind::Regex,
        MatchOp::NotRe(_) => MatchKind::NotRegex,
    };
    Ok(LabelMatcher::new(&matcher.name, &matcher.value, kind)?)
}
