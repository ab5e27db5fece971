//! Parameterized SQL fragments
//!
//! A [`SqlFragment`] pairs SQL text containing positional `?` placeholders
//! with the ordered list of values bound to them. Every composition keeps
//! the two in step: the n-th placeholder (left to right) always binds the
//! n-th parameter.
//!
//! # Security
//! User-provided names and values only ever enter a fragment through
//! [`SqlBuilder::bind`], never through the text.

use std::fmt;

use serde::Serialize;

use crate::error::ValidationError;

/// Positional placeholder understood by the target engine.
pub const PLACEHOLDER: char = '?';

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r:?}"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

/// Immutable SQL text plus its ordered parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlFragment {
    text: String,
    parameters: Vec<SqlValue>,
}

impl SqlFragment {
    /// Create a fragment, checking that the text is non-empty and that the
    /// placeholder count matches the parameter count.
    pub fn new(
        text: impl Into<String>,
        parameters: Vec<SqlValue>,
    ) -> Result<Self, ValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyFragment);
        }

        let placeholders = count_placeholders(&text);
        if placeholders != parameters.len() {
            return Err(ValidationError::PlaceholderMismatch {
                placeholders,
                parameters: parameters.len(),
            });
        }

        Ok(Self { text, parameters })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[SqlValue] {
        &self.parameters
    }

    /// Number of `?` placeholders outside quoted literals.
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.text)
    }

    /// Whether placeholders and parameters agree. Always true for fragments
    /// built through this module.
    pub fn is_balanced(&self) -> bool {
        self.placeholder_count() == self.parameters.len()
    }

    /// Concatenate `other` after `self`, keeping parameter order.
    pub fn append(&self, other: &SqlFragment) -> SqlFragment {
        let mut parameters = self.parameters.clone();
        parameters.extend(other.parameters.iter().cloned());
        SqlFragment {
            text: format!("{}{}", self.text, other.text),
            parameters,
        }
    }

    /// Wrap the text in parentheses.
    pub fn parenthesize(&self) -> SqlFragment {
        SqlFragment {
            text: format!("({})", self.text),
            parameters: self.parameters.clone(),
        }
    }

    /// Join fragments with `separator`, concatenating parameters in fragment
    /// order. Used for conjunctive filters such as `" AND "`.
    pub fn combine(
        fragments: &[SqlFragment],
        separator: &str,
    ) -> Result<SqlFragment, ValidationError> {
        if fragments.is_empty() {
            return Err(ValidationError::EmptyFragment);
        }

        let text = fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(separator);
        let parameters = fragments
            .iter()
            .flat_map(|f| f.parameters.iter().cloned())
            .collect();

        Ok(SqlFragment { text, parameters })
    }

    /// Render the statement with parameters inlined as literals.
    ///
    /// For display and debugging only; never send the result to a database.
    pub fn to_debug_sql(&self) -> String {
        let mut params = self.parameters.iter();
        let mut out = String::with_capacity(self.text.len());
        let mut in_literal = false;
        for c in self.text.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                PLACEHOLDER if !in_literal => match params.next() {
                    Some(value) => out.push_str(&value.to_string()),
                    None => out.push(c),
                },
                _ => out.push(c),
            }
        }
        out
    }
}

impl fmt::Display for SqlFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Count placeholders, skipping single-quoted literals (`''` escapes toggle
/// twice and cancel out).
fn count_placeholders(text: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in text.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            PLACEHOLDER if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

/// Incremental builder that keeps text and parameters in lockstep.
///
/// Transformers only produce SQL through this type, which is what makes the
/// placeholder/parameter parity hold by construction.
#[derive(Debug, Default)]
pub(crate) struct SqlBuilder {
    text: String,
    parameters: Vec<SqlValue>,
}

impl SqlBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append trusted SQL text (schema constants and keywords only).
    pub(crate) fn push(&mut self, sql: &str) -> &mut Self {
        self.text.push_str(sql);
        self
    }

    /// Append a placeholder bound to `value`.
    pub(crate) fn bind(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        self.text.push(PLACEHOLDER);
        self.parameters.push(value.into());
        self
    }

    /// Append another fragment's text and parameters.
    pub(crate) fn push_fragment(&mut self, fragment: &SqlFragment) -> &mut Self {
        self.text.push_str(&fragment.text);
        self.parameters.extend(fragment.parameters.iter().cloned());
        self
    }

    /// Append `items` separated by `separator`, each rendered by `render`.
    pub(crate) fn push_separated<T>(
        &mut self,
        items: &[T],
        separator: &str,
        mut render: impl FnMut(&mut Self, &T),
    ) -> &mut Self {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.text.push_str(separator);
            }
            render(self, item);
        }
        self
    }

    pub(crate) fn build(self) -> SqlFragment {
        debug_assert!(!self.text.is_empty(), "built an empty SQL fragment");
        debug_assert_eq!(count_placeholders(&self.text), self.parameters.len());
        SqlFragment {
            text: self.text,
            parameters: self.parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(text: &str, params: Vec<SqlValue>) -> SqlFragment {
        SqlFragment::new(text, params).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_text() {
        assert_eq!(
            SqlFragment::new("", vec![]),
            Err(ValidationError::EmptyFragment)
        );
        assert_eq!(
            SqlFragment::new("   ", vec![]),
            Err(ValidationError::EmptyFragment)
        );
    }

    #[test]
    fn test_new_rejects_placeholder_mismatch() {
        let result = SqlFragment::new("a = ? AND b = ?", vec!["x".into()]);
        assert_eq!(
            result,
            Err(ValidationError::PlaceholderMismatch {
                placeholders: 2,
                parameters: 1
            })
        );
    }

    #[test]
    fn test_placeholders_inside_literals_are_ignored() {
        let fragment = frag(
            "name = ? AND note = 'why?' AND x = 'it''s?'",
            vec!["a".into()],
        );
        assert_eq!(fragment.placeholder_count(), 1);
        assert!(fragment.is_balanced());
    }

    #[test]
    fn test_append_preserves_order() {
        let a = frag("a = ?", vec!["first".into()]);
        let b = frag(" AND b = ?", vec![SqlValue::Integer(2)]);

        let combined = a.append(&b);
        assert_eq!(combined.text(), "a = ? AND b = ?");
        assert_eq!(
            combined.parameters(),
            &[SqlValue::Text("first".to_string()), SqlValue::Integer(2)]
        );
        // Inputs are untouched
        assert_eq!(a.parameters().len(), 1);
    }

    #[test]
    fn test_parenthesize() {
        let a = frag("x = ?", vec![SqlValue::Real(1.5)]);
        let wrapped = a.parenthesize();
        assert_eq!(wrapped.text(), "(x = ?)");
        assert_eq!(wrapped.parameters(), a.parameters());
    }

    #[test]
    fn test_combine_with_separator() {
        let parts = vec![
            frag("a = ?", vec!["1".into()]),
            frag("b = ?", vec!["2".into()]),
            frag("c IS NULL", vec![]),
        ];
        let combined = SqlFragment::combine(&parts, " AND ").unwrap();
        assert_eq!(combined.text(), "a = ? AND b = ? AND c IS NULL");
        assert_eq!(
            combined.parameters(),
            &[SqlValue::from("1"), SqlValue::from("2")]
        );
    }

    #[test]
    fn test_combine_empty_list_fails() {
        assert_eq!(
            SqlFragment::combine(&[], " AND "),
            Err(ValidationError::EmptyFragment)
        );
    }

    #[test]
    fn test_debug_sql_inlines_parameters() {
        let fragment = frag(
            "name = ? AND v > ? AND n = ?",
            vec!["it's".into(), SqlValue::Real(0.5), SqlValue::Integer(3)],
        );
        assert_eq!(
            fragment.to_debug_sql(),
            "name = 'it''s' AND v > 0.5 AND n = 3"
        );
    }

    #[test]
    fn test_builder_keeps_parity() {
        let mut builder = SqlBuilder::new();
        builder.push("SELECT * FROM t WHERE ");
        builder.push_separated(&["a", "b"], " OR ", |b, name| {
            b.push("name = ").bind(*name);
        });
        let fragment = builder.build();
        assert_eq!(
            fragment.text(),
            "SELECT * FROM t WHERE name = ? OR name = ?"
        );
        assert!(fragment.is_balanced());
    }

    #[test]
    fn test_parameters_serialize_untagged() {
        let fragment = frag(
            "? ? ?",
            vec!["a".into(), SqlValue::Integer(1), SqlValue::Real(2.5)],
        );
        let json = serde_json::to_value(fragment.parameters()).unwrap();
        assert_eq!(json, serde_json::json!(["a", 1, 2.5]));
    }
}
