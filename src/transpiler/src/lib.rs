//! MetricsQL to SQL transpiler
//!
//! Compiles MetricsQL expressions into parameterized SQL over a fixed schema
//! of labeled samples (see [`schema`]). User-supplied names and values only
//! ever reach the SQL as bound parameters.
//!
//! ```
//! use transpiler::{TranspilerOptions, transpile};
//!
//! let sql = transpile(
//!     r#"http_requests_total{method="GET"}"#,
//!     &TranspilerOptions::default(),
//! )
//! .unwrap();
//! assert_eq!(sql.placeholder_count(), sql.parameters().len());
//! ```

pub mod error;
pub mod expr;
pub mod labels;
pub mod parser;
pub mod schema;
pub mod sql;
pub mod transform;
pub mod types;

use tracing::debug;

pub use error::{CompileError, TranspileError, ValidationError};
pub use expr::Expr;
pub use labels::{LabelMatcher, LabelName, MatchKind, MetricName, RegexSemantics};
pub use sql::{SqlFragment, SqlValue};
pub use transform::{Transformer, TranspilerOptions};
pub use types::{GroupingModifier, Selector, TimeWindow};

/// Parse and compile query text.
pub fn transpile(query: &str, options: &TranspilerOptions) -> Result<SqlFragment, TranspileError> {
    if query.len() > options.max_query_bytes {
        return Err(TranspileError::QueryTooLarge {
            size: query.len(),
            limit: options.max_query_bytes,
        });
    }

    let expr = parser::parse(query)?;
    debug!(query = %expr, "Transpiling");
    Ok(Transformer::new(*options).transform(&expr)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpile_end_to_end() {
        let sql = transpile(
            r#"http_requests_total{method="GET"}"#,
            &TranspilerOptions::default(),
        )
        .unwrap();
        assert_eq!(sql.placeholder_count(), 3);
        assert_eq!(
            sql.parameters(),
            &[
                SqlValue::from("http_requests_total"),
                SqlValue::from("method"),
                SqlValue::from("GET"),
            ]
        );
    }

    #[test]
    fn test_transpile_rejects_oversized_queries() {
        let options = TranspilerOptions {
            max_query_bytes: 8,
            ..TranspilerOptions::default()
        };
        assert_eq!(
            transpile("http_requests_total", &options),
            Err(TranspileError::QueryTooLarge { size: 19, limit: 8 })
        );
    }

    #[test]
    fn test_transpile_reports_compile_errors() {
        let options = TranspilerOptions::default();
        let err = transpile("histogram_quantile(0.9, up)", &options).unwrap_err();
        assert_eq!(
            err,
            TranspileError::Compile(CompileError::UnsupportedFunction(
                "histogram_quantile".to_string()
            ))
        );
    }
}
