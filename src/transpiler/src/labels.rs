//! Validated metric/label names and label matchers
//!
//! Names are checked once, at construction. Anything holding a
//! [`MetricName`], [`LabelName`] or [`LabelMatcher`] can rely on it being
//! well-formed.
//!
//! # Regex semantics
//!
//! [`LabelMatcher::matches`] evaluates `=~` / `!~` with an anchored full
//! match, as Prometheus does. The SQL emitted by [`LabelMatcher::to_sql`]
//! hands the raw pattern to the engine's `REGEXP` predicate, which performs
//! an unanchored search: `abc` matches `abc123` there but not here.
//! [`RegexSemantics::FullMatch`] binds the pattern as `^(?:pattern)$` so both
//! sides agree.

use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::error::ValidationError;
use crate::schema::{REGEXP_OPERATOR, Table};
use crate::sql::{SqlBuilder, SqlFragment};

/// A label name matching `^[a-zA-Z_][a-zA-Z0-9_]*$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LabelName(String);

impl LabelName {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if is_valid_label_name(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ValidationError::InvalidLabelName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LabelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for LabelName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// A metric name matching `^[a-zA-Z_:][a-zA-Z0-9_:]*$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MetricName(String);

impl MetricName {
    pub fn new(name: &str) -> Result<Self, ValidationError> {
        if is_valid_metric_name(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ValidationError::InvalidMetricName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for MetricName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// `^[a-zA-Z_][a-zA-Z0-9_]*$`
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `^[a-zA-Z_:][a-zA-Z0-9_:]*$`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Compile `pattern`, mapping failures to [`ValidationError::InvalidRegex`].
pub fn compile_regex(pattern: &str) -> Result<Regex, ValidationError> {
    Regex::new(pattern).map_err(|e| ValidationError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Wrap a pattern so it only matches whole strings.
pub fn anchor_pattern(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

/// Label matcher types matching Prometheus semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchKind {
    /// Exact string match (=)
    Equal,
    /// Not equal (!=)
    NotEqual,
    /// Regex match (=~)
    Regex,
    /// Regex not match (!~)
    NotRegex,
}

impl MatchKind {
    fn is_negated(&self) -> bool {
        matches!(self, Self::NotEqual | Self::NotRegex)
    }

    fn is_regex(&self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::Regex => write!(f, "=~"),
            Self::NotRegex => write!(f, "!~"),
        }
    }
}

/// How `=~` / `!~` patterns are bound into SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegexSemantics {
    /// Raw pattern, unanchored search on the engine side
    #[default]
    Search,
    /// Pattern wrapped as `^(?:pattern)$`, agreeing with [`LabelMatcher::matches`]
    FullMatch,
}

/// A single label filter of a selector
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    name: LabelName,
    value: String,
    kind: MatchKind,
    /// Anchored form of `value`, present for regex kinds
    anchored: Option<Regex>,
}

impl PartialEq for LabelMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.kind == other.kind
    }
}

impl LabelMatcher {
    /// Create a matcher, validating the label name and, for regex kinds,
    /// the pattern.
    pub fn new(name: &str, value: &str, kind: MatchKind) -> Result<Self, ValidationError> {
        let name = LabelName::new(name)?;
        let anchored = if kind.is_regex() {
            compile_regex(value)?;
            Some(compile_regex(&anchor_pattern(value))?)
        } else {
            None
        };

        Ok(Self {
            name,
            value: value.to_string(),
            kind,
            anchored,
        })
    }

    /// Create a new equality matcher
    pub fn equal(name: &str, value: &str) -> Result<Self, ValidationError> {
        Self::new(name, value, MatchKind::Equal)
    }

    /// Create a new not-equal matcher
    pub fn not_equal(name: &str, value: &str) -> Result<Self, ValidationError> {
        Self::new(name, value, MatchKind::NotEqual)
    }

    /// Create a new regex matcher
    pub fn regex_match(name: &str, pattern: &str) -> Result<Self, ValidationError> {
        Self::new(name, pattern, MatchKind::Regex)
    }

    /// Create a new regex not-match matcher
    pub fn regex_not_match(name: &str, pattern: &str) -> Result<Self, ValidationError> {
        Self::new(name, pattern, MatchKind::NotRegex)
    }

    pub fn name(&self) -> &LabelName {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// Evaluate the matcher against a label value in process.
    ///
    /// An absent label only satisfies the negated kinds. Regex kinds use an
    /// anchored full match.
    pub fn matches(&self, candidate: Option<&str>) -> bool {
        let Some(candidate) = candidate else {
            return self.kind.is_negated();
        };

        let is_match = |re: &Regex| re.is_match(candidate);
        match self.kind {
            MatchKind::Equal => candidate == self.value,
            MatchKind::NotEqual => candidate != self.value,
            MatchKind::Regex => self.anchored.as_ref().is_some_and(is_match),
            MatchKind::NotRegex => !self.anchored.as_ref().is_some_and(is_match),
        }
    }

    /// Emit the membership filter for this matcher with search semantics.
    ///
    /// ```sql
    /// mi.label_set_id [NOT] IN (
    ///   SELECT m_lsm.label_set_id FROM label_set_membership m_lsm ...
    ///   WHERE m_lk.name = ? AND m_lv.value = ?)
    /// ```
    pub fn to_sql(&self) -> SqlFragment {
        self.to_sql_with(RegexSemantics::Search)
    }

    /// Emit the membership filter, binding regex patterns per `semantics`.
    pub fn to_sql_with(&self, semantics: RegexSemantics) -> SqlFragment {
        let mi = Table::MetricInstance.alias();
        let membership = Table::LabelSetMembership;
        let key = Table::LabelKey;
        let value = Table::LabelValue;

        let mut sql = SqlBuilder::new();
        sql.push(&format!("{mi}.label_set_id "));
        if self.kind.is_negated() {
            sql.push("NOT ");
        }
        sql.push(&format!(
            "IN (SELECT m_lsm.label_set_id FROM {} m_lsm \
             JOIN {} m_lk ON m_lk.id = m_lsm.label_key_id \
             JOIN {} m_lv ON m_lv.id = m_lsm.label_value_id \
             WHERE m_lk.name = ",
            membership.name(),
            key.name(),
            value.name()
        ));
        sql.bind(self.name.as_str());

        if self.kind.is_regex() {
            sql.push(&format!(" AND m_lv.value {REGEXP_OPERATOR} "));
            match semantics {
                RegexSemantics::Search => sql.bind(self.value.as_str()),
                RegexSemantics::FullMatch => sql.bind(anchor_pattern(&self.value)),
            };
        } else {
            sql.push(" AND m_lv.value = ").bind(self.value.as_str());
        }
        sql.push(")");
        sql.build()
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.kind, self.value)
    }
}
