//! Error types for MetricsQL compilation
//!
//! Errors are split by the stage that raises them:
//!
//! - [`ValidationError`] - raised while constructing value objects (names,
//!   regular expressions, windows, quantiles), before any SQL exists
//! - [`CompileError`] - raised while walking the expression tree
//! - [`TranspileError`] - the top-level error of the query-text entry point,
//!   adding parse diagnostics from the frontend

use thiserror::Error;

/// Input rejected while building a value object.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Label name does not match `^[a-zA-Z_][a-zA-Z0-9_]*$`.
    #[error("Invalid label name '{0}': must match ^[a-zA-Z_][a-zA-Z0-9_]*$")]
    InvalidLabelName(String),
    /// Metric name does not match `^[a-zA-Z_:][a-zA-Z0-9_:]*$`.
    #[error("Invalid metric name '{0}': must match ^[a-zA-Z_:][a-zA-Z0-9_:]*$")]
    InvalidMetricName(String),
    /// Pattern does not compile as a regular expression.
    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
    /// Quantile outside `[0.0, 1.0]`.
    #[error("Quantile {value} out of range in {function}: must be within [0.0, 1.0]")]
    QuantileOutOfRange { function: String, value: f64 },
    /// `quantile_over_time` built without a quantile.
    #[error("{function} requires a quantile argument")]
    MissingQuantile { function: String },
    /// A quantile was supplied to a rollup that takes none.
    #[error("{function} does not take a quantile argument")]
    UnexpectedQuantile { function: String },
    /// Duration is zero or cannot be parsed.
    #[error("Invalid duration '{0}': must be a positive duration such as 5m")]
    InvalidDuration(String),
    /// SQL text of a fragment is empty.
    #[error("SQL fragment text must not be empty")]
    EmptyFragment,
    /// Placeholder count in the text disagrees with the parameter list.
    #[error("SQL fragment has {placeholders} placeholders but {parameters} parameters")]
    PlaceholderMismatch {
        placeholders: usize,
        parameters: usize,
    },
    /// `by (...)` / `without (...)` with no labels.
    #[error("Grouping modifier '{0}' requires at least one label")]
    EmptyLabelList(String),
    /// Label value contains the `,` that separates pairs in `labels`.
    #[error("Label value '{0}' must not contain ','")]
    UnencodableLabelValue(String),
}

/// Expression tree that cannot be turned into SQL.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Function name is not a known rollup, aggregation or label function.
    #[error("Unsupported function '{0}'")]
    UnsupportedFunction(String),
    /// Wrong number or kind of arguments.
    #[error("Invalid arguments for {function}: {reason} (expected {usage})")]
    InvalidArguments {
        function: String,
        reason: String,
        usage: String,
    },
    /// Grouping modifier that is not implemented.
    #[error("Aggregation modifier '{modifier}' is not yet implemented; use {alternative} instead")]
    UnsupportedModifier {
        modifier: String,
        alternative: String,
    },
    /// Rollup applied to a selector without `[window]`.
    #[error("{function} requires a time window, e.g. {function}(http_requests_total[5m])")]
    MissingTimeWindow { function: String },
    /// Construct the engine does not handle.
    #[error("Unsupported MetricsQL feature: {0}")]
    UnsupportedFeature(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Failure of the query-text entry point.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranspileError {
    /// The parser rejected the query; every diagnostic it reported is kept.
    #[error("MetricsQL parse error: {}", .diagnostics.join("; "))]
    Parse { diagnostics: Vec<String> },
    /// Query text exceeds the configured limit.
    #[error("Query of {size} bytes exceeds the limit of {limit} bytes")]
    QueryTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl TranspileError {
    /// Build a parse error from the raw, possibly multi-line, parser message.
    pub fn from_parser_message(message: &str) -> Self {
        let diagnostics: Vec<String> = message
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        let diagnostics = if diagnostics.is_empty() {
            vec!["unknown parse error".to_string()]
        } else {
            diagnostics
        };

        Self::Parse { diagnostics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_keeps_every_diagnostic() {
        let err = TranspileError::from_parser_message("unexpected '}'\n\n  missing value \n");
        match &err {
            TranspileError::Parse { diagnostics } => {
                assert_eq!(diagnostics, &vec!["unexpected '}'", "missing value"]);
            }
            other => panic!("Expected Parse, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "MetricsQL parse error: unexpected '}'; missing value"
        );
    }

    #[test]
    fn test_parse_error_never_empty() {
        let err = TranspileError::from_parser_message("   ");
        assert!(matches!(err, TranspileError::Parse { diagnostics } if diagnostics.len() == 1));
    }

    #[test]
    fn test_missing_window_message_names_function() {
        let err = CompileError::MissingTimeWindow {
            function: "rate".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rate requires a time window, e.g. rate(http_requests_total[5m])"
        );
    }

    #[test]
    fn test_validation_converts_into_compile_error() {
        let err = CompileError::from(ValidationError::InvalidLabelName("1bad".to_string()));
        assert!(matches!(
            err,
            CompileError::Validation(ValidationError::InvalidLabelName(_))
        ));
    }
}
