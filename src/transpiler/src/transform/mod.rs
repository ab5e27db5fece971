//! Expression tree to SQL compilation
//!
//! [`Transformer`] walks an [`Expr`] bottom-up. Every node compiles to a
//! [`SqlFragment`] that either yields rows of `timestamp, value, labels`
//! (a vector) or a single `value` row (a scalar); composite nodes embed their
//! children's fragments as CTEs.
//!
//! # Example
//!
//! ```
//! use transpiler::labels::LabelMatcher;
//! use transpiler::transform::{Transformer, TranspilerOptions};
//! use transpiler::{Expr, Selector};
//!
//! let selector = Selector::new("http_requests_total")
//!     .unwrap()
//!     .with_matcher(LabelMatcher::equal("method", "GET").unwrap());
//! let sql = Transformer::new(TranspilerOptions::default())
//!     .transform(&Expr::Selector(selector))
//!     .unwrap();
//! assert_eq!(sql.parameters().len(), 3);
//! ```

pub mod aggregation;
pub mod binary;
pub mod label_ops;
pub(crate) mod label_sql;
pub mod rollup;
pub mod selector;

use common::config::TranspilerConfig;
use tracing::debug;

use crate::error::CompileError;
use crate::expr::Expr;
use crate::labels::RegexSemantics;
use crate::schema::Table;
use crate::sql::{SqlBuilder, SqlFragment, SqlValue};
use crate::types::{
    AggregationKind, AggregationSpec, BinaryOpSpec, BinaryOperator, RollupKind, RollupSpec,
    Selector,
};

pub use aggregation::AggregationTransformer;
pub use binary::BinaryOpTransformer;
pub use label_ops::{LabelManipulationTransformer, LabelOpsMode};
pub use rollup::RollupTransformer;
pub use selector::SelectorTransformer;

/// Compilation options, fixed for the lifetime of a [`Transformer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranspilerOptions {
    /// Group `by (...)` aggregations on extracted label values
    pub canonical_grouping: bool,
    pub label_ops: LabelOpsMode,
    pub regex_semantics: RegexSemantics,
    /// Longest accepted query text, in bytes
    pub max_query_bytes: usize,
}

impl Default for TranspilerOptions {
    fn default() -> Self {
        Self::from(&TranspilerConfig::default())
    }
}

impl From<&TranspilerConfig> for TranspilerOptions {
    fn from(config: &TranspilerConfig) -> Self {
        Self {
            canonical_grouping: config.canonical_grouping,
            label_ops: if config.legacy_label_ops {
                LabelOpsMode::Legacy
            } else {
                LabelOpsMode::Rewrite
            },
            regex_semantics: if config.anchor_regex_matchers {
                RegexSemantics::FullMatch
            } else {
                RegexSemantics::Search
            },
            max_query_bytes: config.max_query_bytes,
        }
    }
}

/// Whether a compiled node yields a single value or a set of series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One row with a `value` column
    Scalar,
    /// Rows of `timestamp, value, labels`
    Vector,
}

/// A compiled node
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub fragment: SqlFragment,
    pub shape: Shape,
}

impl Compiled {
    fn vector(fragment: SqlFragment) -> Self {
        Self {
            fragment,
            shape: Shape::Vector,
        }
    }

    fn scalar(fragment: SqlFragment) -> Self {
        Self {
            fragment,
            shape: Shape::Scalar,
        }
    }
}

/// Dispatches each expression node to the transformer for its kind.
#[derive(Debug, Clone, Copy)]
pub struct Transformer {
    options: TranspilerOptions,
    selector: SelectorTransformer,
    rollup: RollupTransformer,
    aggregation: AggregationTransformer,
    binary: BinaryOpTransformer,
    labels: LabelManipulationTransformer,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(TranspilerOptions::default())
    }
}

impl Transformer {
    pub fn new(options: TranspilerOptions) -> Self {
        let selector = SelectorTransformer::new(options.regex_semantics);
        Self {
            options,
            selector,
            rollup: RollupTransformer::new(selector),
            aggregation: AggregationTransformer::new(selector),
            binary: BinaryOpTransformer::new(),
            labels: LabelManipulationTransformer::new(options.label_ops),
        }
    }

    pub fn options(&self) -> &TranspilerOptions {
        &self.options
    }

    /// Compile `expr` into a statement returning `timestamp, value, labels`.
    ///
    /// A scalar result is stamped with the latest sample timestamp and empty
    /// labels.
    pub fn transform(&self, expr: &Expr) -> Result<SqlFragment, CompileError> {
        let compiled = self.compile(expr)?;
        let fragment = match compiled.shape {
            Shape::Vector => compiled.fragment,
            Shape::Scalar => {
                let mut sql = SqlBuilder::new();
                sql.push(&format!(
                    "SELECT (SELECT MAX(timestamp) FROM {}) AS timestamp, value, '' AS labels \
                     FROM (",
                    Table::SampleValue.name()
                ))
                .push_fragment(&compiled.fragment)
                .push(")");
                sql.build()
            }
        };

        debug!(
            parameters = fragment.parameters().len(),
            bytes = fragment.text().len(),
            "Compiled expression"
        );
        Ok(fragment)
    }

    /// Compile one node, reporting its shape.
    pub fn compile(&self, expr: &Expr) -> Result<Compiled, CompileError> {
        match expr {
            Expr::Selector(selector) => {
                debug!(metric = selector.metric.as_str(), "Compiling selector");
                Ok(Compiled::vector(self.selector.transform(selector)))
            }
            Expr::FunctionCall { name, args } => {
                debug!(function = name.as_str(), "Compiling function call");
                self.compile_call(name, args).map(Compiled::vector)
            }
            Expr::Aggregation {
                func,
                expr,
                modifier,
            } => {
                debug!(aggregation = func.as_str(), "Compiling aggregation");
                let kind = AggregationKind::from_operator(func)
                    .ok_or_else(|| CompileError::UnsupportedFunction(func.clone()))?;
                let spec = AggregationSpec::new(
                    kind,
                    modifier.clone(),
                    self.options.canonical_grouping,
                )?;

                let fragment = match expr.unwrap_parens() {
                    Expr::Selector(selector) => {
                        self.aggregation.transform_selector(&spec, selector)?
                    }
                    other => {
                        let input = self.compile_vector(other, func)?;
                        self.aggregation.transform_fragment(&spec, &input)?
                    }
                };
                Ok(Compiled::vector(fragment))
            }
            Expr::BinaryOp {
                op,
                left,
                right,
                comparison,
            } => {
                debug!(operator = op.as_str(), "Compiling binary operation");
                let operator = BinaryOperator::from_symbol(op).ok_or_else(|| {
                    CompileError::UnsupportedFeature(format!("binary operator '{op}'"))
                })?;
                let left = self.compile(left)?;
                let right = self.compile(right)?;
                let shape = if left.shape == Shape::Scalar && right.shape == Shape::Scalar {
                    Shape::Scalar
                } else {
                    Shape::Vector
                };

                let spec = BinaryOpSpec::new(
                    operator,
                    left.fragment,
                    right.fragment,
                    right.shape == Shape::Scalar,
                )
                .with_left_scalar(left.shape == Shape::Scalar)
                .with_comparison(*comparison);

                let fragment = self.binary.transform(&spec)?;
                Ok(Compiled { fragment, shape })
            }
            Expr::Paren(inner) => self.compile(inner),
            Expr::NumberLiteral(value) => {
                let mut sql = SqlBuilder::new();
                sql.push("SELECT ").bind(SqlValue::Real(*value)).push(" AS value");
                Ok(Compiled::scalar(sql.build()))
            }
            Expr::StringLiteral(value) => Err(CompileError::UnsupportedFeature(format!(
                "string literal {value:?} cannot be used as a value"
            ))),
        }
    }

    fn compile_call(&self, name: &str, args: &[Expr]) -> Result<SqlFragment, CompileError> {
        if let Some(kind) = RollupKind::from_function_name(name) {
            return self.compile_rollup(kind, args);
        }

        match name {
            "label_set" => {
                let [input, key, value] =
                    exact_args::<3>(name, args, "label_set(up, \"env\", \"prod\")")?;
                let input = self.compile_vector(input, name)?;
                let key = string_arg(name, key)?;
                let value = string_arg(name, value)?;
                self.labels.label_set(&input, key, value)
            }
            "label_del" | "label_keep" => {
                let usage = if name == "label_del" {
                    "label_del(up, \"instance\", ...)"
                } else {
                    "label_keep(up, \"job\", ...)"
                };
                let Some((input, keys)) = args.split_first() else {
                    return Err(invalid_arguments(name, "expected a vector and label names", usage));
                };
                if keys.is_empty() {
                    return Err(invalid_arguments(name, "expected at least one label name", usage));
                }
                let input = self.compile_vector(input, name)?;
                let keys = keys
                    .iter()
                    .map(|k| string_arg(name, k))
                    .collect::<Result<Vec<_>, _>>()?;
                if name == "label_del" {
                    self.labels.label_del(&input, &keys)
                } else {
                    self.labels.label_keep(&input, &keys)
                }
            }
            "label_copy" | "label_move" => {
                let [input, src, dst] =
                    exact_args::<3>(name, args, "label_copy(up, \"src\", \"dst\")")?;
                let input = self.compile_vector(input, name)?;
                let src = string_arg(name, src)?;
                let dst = string_arg(name, dst)?;
                if name == "label_copy" {
                    self.labels.label_copy(&input, src, dst)
                } else {
                    self.labels.label_move(&input, src, dst)
                }
            }
            "label_replace" => {
                let [input, dst, replacement, src, regex] = exact_args::<5>(
                    name,
                    args,
                    "label_replace(up, \"dst\", \"$1\", \"src\", \"(.*)\")",
                )?;
                let input = self.compile_vector(input, name)?;
                self.labels.label_replace(
                    &input,
                    string_arg(name, dst)?,
                    string_arg(name, replacement)?,
                    string_arg(name, src)?,
                    string_arg(name, regex)?,
                )
            }
            _ => Err(CompileError::UnsupportedFunction(name.to_string())),
        }
    }

    fn compile_rollup(&self, kind: RollupKind, args: &[Expr]) -> Result<SqlFragment, CompileError> {
        let function = kind.function_name();
        let (quantile, target) = match (kind, args) {
            (RollupKind::QuantileOverTime, [q, target]) => match q.unwrap_parens() {
                Expr::NumberLiteral(q) => (Some(*q), target),
                _ => {
                    return Err(invalid_arguments(
                        function,
                        "the quantile must be a number literal",
                        kind.usage(),
                    ));
                }
            },
            (RollupKind::QuantileOverTime, _) => {
                return Err(invalid_arguments(
                    function,
                    &format!("expected 2 arguments, got {}", args.len()),
                    kind.usage(),
                ));
            }
            (_, [target]) => (None, target),
            (_, _) => {
                return Err(invalid_arguments(
                    function,
                    &format!("expected 1 argument, got {}", args.len()),
                    kind.usage(),
                ));
            }
        };

        let selector: &Selector = match target.unwrap_parens() {
            Expr::Selector(selector) => selector,
            _ => {
                return Err(invalid_arguments(
                    function,
                    "the argument must be a range selector",
                    kind.usage(),
                ));
            }
        };

        let spec = RollupSpec::new(kind, selector.clone(), quantile)?;
        Ok(self.rollup.transform(&spec))
    }

    /// Compile an argument that must yield series.
    fn compile_vector(&self, expr: &Expr, function: &str) -> Result<SqlFragment, CompileError> {
        let compiled = self.compile(expr)?;
        match compiled.shape {
            Shape::Vector => Ok(compiled.fragment),
            Shape::Scalar => Err(CompileError::InvalidArguments {
                function: function.to_string(),
                reason: "expected a vector, got a scalar".to_string(),
                usage: format!("{function}(http_requests_total, ...)"),
            }),
        }
    }
}

fn invalid_arguments(function: &str, reason: &str, usage: &str) -> CompileError {
    CompileError::InvalidArguments {
        function: function.to_string(),
        reason: reason.to_string(),
        usage: usage.to_string(),
    }
}

fn exact_args<'a, const N: usize>(
    function: &str,
    args: &'a [Expr],
    usage: &str,
) -> Result<&'a [Expr; N], CompileError> {
    args.try_into().map_err(|_| {
        invalid_arguments(
            function,
            &format!("expected {N} arguments, got {}", args.len()),
            usage,
        )
    })
}

fn string_arg<'a>(function: &str, arg: &'a Expr) -> Result<&'a str, CompileError> {
    match arg.unwrap_parens() {
        Expr::StringLiteral(value) => Ok(value.as_str()),
        other => Err(CompileError::InvalidArguments {
            function: function.to_string(),
            reason: format!("expected a string literal, got {other}"),
            usage: format!("{function}(http_requests_total, \"label\", ...)"),
        }),
    }
}
