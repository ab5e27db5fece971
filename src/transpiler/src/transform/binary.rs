//! Binary operations between compiled expressions
//!
//! Vector/vector arithmetic and comparisons join both sides on
//! `(timestamp, labels)`; rows without a partner are dropped. A scalar side
//! is cross joined. Set operations compare `labels` only. Every vector result
//! is ordered by `(timestamp, labels)`.

use tracing::trace;

use crate::error::CompileError;
use crate::sql::{SqlBuilder, SqlFragment};
use crate::types::{ArithmeticOp, BinaryOpSpec, BinaryOperator, ComparisonMode, SetOp};

/// Compiles [`BinaryOpSpec`]s into SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryOpTransformer;

impl BinaryOpTransformer {
    pub fn new() -> Self {
        Self
    }

    /// Compile `spec`. The result is a scalar (single `value` column) when
    /// both sides are scalars, otherwise a vector.
    pub fn transform(&self, spec: &BinaryOpSpec) -> Result<SqlFragment, CompileError> {
        let fragment = match (spec.op, spec.left_is_scalar, spec.right_is_scalar) {
            (BinaryOperator::Set(_), true, _) | (BinaryOperator::Set(_), _, true) => {
                return Err(CompileError::UnsupportedFeature(format!(
                    "set operator '{}' requires vector operands on both sides",
                    spec.op
                )));
            }
            (BinaryOperator::Set(op), false, false) => set_operation(op, spec),
            (_, true, true) => scalar_scalar(spec)?,
            (_, false, true) => vector_scalar(spec, Side::Left),
            (_, true, false) => vector_scalar(spec, Side::Right),
            (_, false, false) => vector_vector(spec),
        };

        trace!(
            sql = fragment.text(),
            "Compiled binary operator {}",
            spec.op
        );
        Ok(fragment)
    }
}

/// Which operand is the vector
#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// `left <op> right` over two value expressions
fn value_expression(op: BinaryOperator, left: &str, right: &str) -> String {
    match op {
        // Avoid integer division
        BinaryOperator::Arithmetic(ArithmeticOp::Div) => format!("CAST({left} AS REAL) / {right}"),
        _ => {
            let symbol = op.sql_operator().unwrap_or("+");
            format!("{left} {symbol} {right}")
        }
    }
}

/// Select list column for `value` and an optional `WHERE` condition
fn value_and_filter(
    spec: &BinaryOpSpec,
    left: &str,
    right: &str,
    kept: &str,
) -> (String, Option<String>) {
    let expression = value_expression(spec.op, left, right);
    match (spec.op, spec.comparison) {
        (BinaryOperator::Comparison(_), ComparisonMode::Bool) => (
            format!("CASE WHEN {expression} THEN 1.0 ELSE 0.0 END"),
            None,
        ),
        (BinaryOperator::Comparison(_), ComparisonMode::Filter) => {
            (kept.to_string(), Some(expression))
        }
        _ => (expression, None),
    }
}

fn vector_scalar(spec: &BinaryOpSpec, vector: Side) -> SqlFragment {
    let (left, right) = match vector {
        Side::Left => ("metric_data.value", "scalar_value.value"),
        Side::Right => ("scalar_value.value", "metric_data.value"),
    };
    let (value, filter) = value_and_filter(spec, left, right, "metric_data.value");

    // CTEs follow operand order so parameters bind left to right
    let (first, second) = match vector {
        Side::Left => ("metric_data", "scalar_value"),
        Side::Right => ("scalar_value", "metric_data"),
    };

    let mut sql = SqlBuilder::new();
    sql.push(&format!("WITH {first} AS ("))
        .push_fragment(&spec.left)
        .push(&format!("), {second} AS ("))
        .push_fragment(&spec.right)
        .push(&format!(
            ") SELECT metric_data.timestamp AS timestamp, {value} AS value, \
             metric_data.labels AS labels FROM {first}, {second}"
        ));
    if let Some(filter) = filter {
        sql.push(&format!(" WHERE {filter}"));
    }
    sql.push(" ORDER BY timestamp, labels");
    sql.build()
}

fn vector_vector(spec: &BinaryOpSpec) -> SqlFragment {
    let (left, right) = ("left_data.value", "right_data.value");
    let (value, filter) = value_and_filter(spec, left, right, left);

    let mut sql = SqlBuilder::new();
    push_operands(&mut sql, spec);
    sql.push(&format!(
        " SELECT left_data.timestamp AS timestamp, {value} AS value, left_data.labels AS labels \
         FROM left_data JOIN right_data \
         ON left_data.timestamp = right_data.timestamp AND left_data.labels = right_data.labels"
    ));
    if let Some(filter) = filter {
        sql.push(&format!(" WHERE {filter}"));
    }
    sql.push(" ORDER BY timestamp, labels");
    sql.build()
}

fn set_operation(op: SetOp, spec: &BinaryOpSpec) -> SqlFragment {
    let mut sql = SqlBuilder::new();
    push_operands(&mut sql, spec);
    match op {
        SetOp::And => sql.push(
            " SELECT timestamp, value, labels FROM left_data \
             WHERE EXISTS (SELECT 1 FROM right_data WHERE right_data.labels = left_data.labels)",
        ),
        SetOp::Unless => sql.push(
            " SELECT timestamp, value, labels FROM left_data \
             WHERE NOT EXISTS \
             (SELECT 1 FROM right_data WHERE right_data.labels = left_data.labels)",
        ),
        SetOp::Or => sql.push(
            " SELECT timestamp, value, labels FROM left_data \
             UNION SELECT timestamp, value, labels FROM right_data",
        ),
    };
    sql.push(" ORDER BY timestamp, labels");
    sql.build()
}

fn scalar_scalar(spec: &BinaryOpSpec) -> Result<SqlFragment, CompileError> {
    let is_comparison = matches!(spec.op, BinaryOperator::Comparison(_));
    if is_comparison && spec.comparison == ComparisonMode::Filter {
        return Err(CompileError::UnsupportedFeature(format!(
            "comparison '{}' between scalars requires the bool modifier",
            spec.op
        )));
    }
    let (left, right) = ("left_scalar.value", "right_scalar.value");
    let (value, _) = value_and_filter(spec, left, right, left);

    let mut sql = SqlBuilder::new();
    sql.push("WITH left_scalar AS (")
        .push_fragment(&spec.left)
        .push("), right_scalar AS (")
        .push_fragment(&spec.right)
        .push(&format!(
            ") SELECT {value} AS value FROM left_scalar, right_scalar"
        ));
    Ok(sql.build())
}

fn push_operands(sql: &mut SqlBuilder, spec: &BinaryOpSpec) {
    sql.push("WITH left_data AS (")
        .push_fragment(&spec.left)
        .push("), right_data AS (")
        .push_fragment(&spec.right)
        .push(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqlValue;

    fn vector(name: &str) -> SqlFragment {
        let text = "SELECT timestamp, value, labels FROM t WHERE name = ?";
        SqlFragment::new(text, vec![name.into()]).unwrap()
    }

    fn scalar(value: f64) -> SqlFragment {
        SqlFragment::new("SELECT ? AS value", vec![SqlValue::Real(value)]).unwrap()
    }

    fn op(symbol: &str) -> BinaryOperator {
        BinaryOperator::from_symbol(symbol).unwrap()
    }

    #[test]
    fn test_vector_scalar_arithmetic() {
        let spec = BinaryOpSpec::new(op("*"), vector("a"), scalar(2.0), true);
        let fragment = BinaryOpTransformer::new().transform(&spec).unwrap();

        assert!(fragment.text().starts_with("WITH metric_data AS (SELECT"));
        assert!(fragment.text().contains("metric_data.value * scalar_value.value AS value"));
        assert!(fragment.text().contains("FROM metric_data, scalar_value"));
        assert_eq!(
            fragment.parameters(),
            &[SqlValue::from("a"), SqlValue::Real(2.0)]
        );
    }

    #[test]
    fn test_scalar_on_the_left_keeps_parameter_order() {
        let spec = BinaryOpSpec::new(op("-"), scalar(10.0), vector("a"), false)
            .with_left_scalar(true);
        let fragment = BinaryOpTransformer::new().transform(&spec).unwrap();

        assert!(
            fragment
                .text()
                .starts_with("WITH scalar_value AS (SELECT ? AS value), metric_data AS (")
        );
        assert!(fragment.text().contains("scalar_value.value - metric_data.value AS value"));
        assert_eq!(
            fragment.parameters(),
            &[SqlValue::Real(10.0), SqlValue::from("a")]
        );
    }

    #[test]
    fn test_division_casts_to_real() {
        let spec = BinaryOpSpec::new(op("/"), vector("a"), vector("b"), false);
        let fragment = BinaryOpTransformer::new().transform(&spec).unwrap();
        assert!(fragment.text().contains("CAST(left_data.value AS REAL) / right_data.value"));
        assert!(fragment.text().contains(
            "ON left_data.timestamp = right_data.timestamp AND left_data.labels = right_data.labels"
        ));
    }

    #[test]
    fn test_comparison_modes() {
        let bool_spec = BinaryOpSpec::new(op(">"), vector("a"), scalar(1.0), true);
        let fragment = BinaryOpTransformer::new().transform(&bool_spec).unwrap();
        assert!(fragment.text().contains(
            "CASE WHEN metric_data.value > scalar_value.value THEN 1.0 ELSE 0.0 END"
        ));

        let filter_spec = bool_spec.with_comparison(ComparisonMode::Filter);
        let fragment = BinaryOpTransformer::new().transform(&filter_spec).unwrap();
        assert!(fragment.text().contains("metric_data.value AS value"));
        assert!(fragment.text().contains("WHERE metric_data.value > scalar_value.value"));
    }

    #[test]
    fn test_set_operations() {
        let transformer = BinaryOpTransformer::new();
        let cases = [
            ("and", "WHERE EXISTS"),
            ("unless", "WHERE NOT EXISTS"),
            ("or", "UNION SELECT"),
        ];
        for (symbol, expected) in cases {
            let spec = BinaryOpSpec::new(op(symbol), vector("a"), vector("b"), false);
            let fragment = transformer.transform(&spec).unwrap();
            assert!(fragment.text().contains(expected), "{symbol}");
            assert!(fragment.text().ends_with("ORDER BY timestamp, labels"));
            assert_eq!(
                fragment.parameters(),
                &[SqlValue::from("a"), SqlValue::from("b")]
            );
        }
    }

    #[test]
    fn test_set_operation_with_scalar_fails() {
        let spec = BinaryOpSpec::new(op("and"), vector("a"), scalar(1.0), true);
        assert!(matches!(
            BinaryOpTransformer::new().transform(&spec),
            Err(CompileError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_scalar_scalar() {
        let spec = BinaryOpSpec::new(op("+"), scalar(1.0), scalar(2.0), true)
            .with_left_scalar(true);
        let fragment = BinaryOpTransformer::new().transform(&spec).unwrap();
        assert!(fragment.text().ends_with(
            "SELECT left_scalar.value + right_scalar.value AS value FROM left_scalar, right_scalar"
        ));

        let filter = BinaryOpSpec::new(op("<"), scalar(1.0), scalar(2.0), true)
            .with_left_scalar(true)
            .with_comparison(ComparisonMode::Filter);
        assert!(BinaryOpTransformer::new().transform(&filter).is_err());
    }
}
