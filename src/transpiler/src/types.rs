//! Value objects passed between the dispatcher and the transformers
//!
//! All of these are immutable once built and validated on construction, so
//! the transformers never re-check their inputs.

use std::fmt;
use std::time::Duration;

use crate::error::{CompileError, ValidationError};
use crate::labels::{LabelMatcher, LabelName, MetricName};
use crate::sql::SqlFragment;

/// Time range a selector is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    duration_ms: u64,
    max_timestamp_ms: Option<i64>,
}

impl TimeWindow {
    /// A window ending at the latest observed sample.
    pub fn new(duration_ms: u64) -> Result<Self, ValidationError> {
        if duration_ms == 0 {
            return Err(ValidationError::InvalidDuration("0ms".to_string()));
        }
        if i64::try_from(duration_ms).is_err() {
            return Err(ValidationError::InvalidDuration(format!("{duration_ms}ms")));
        }
        Ok(Self {
            duration_ms,
            max_timestamp_ms: None,
        })
    }

    /// A window covering `[max_timestamp_ms - duration_ms, max_timestamp_ms]`.
    pub fn ending_at(duration_ms: u64, max_timestamp_ms: i64) -> Result<Self, ValidationError> {
        let window = Self::new(duration_ms)?;
        Ok(Self {
            max_timestamp_ms: Some(max_timestamp_ms),
            ..window
        })
    }

    pub fn from_duration(duration: Duration) -> Result<Self, ValidationError> {
        let ms = u64::try_from(duration.as_millis())
            .map_err(|_| ValidationError::InvalidDuration(format!("{duration:?}")))?;
        Self::new(ms)
    }

    /// Parse a duration string such as `5m`, `1h30m` or `500ms`.
    pub fn parse(duration: &str) -> Result<Self, ValidationError> {
        let parsed = humantime::parse_duration(duration.trim())
            .map_err(|_| ValidationError::InvalidDuration(duration.to_string()))?;
        Self::from_duration(parsed)
            .map_err(|_| ValidationError::InvalidDuration(duration.to_string()))
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Duration as a signed value, for timestamp arithmetic.
    pub fn duration_ms_i64(&self) -> i64 {
        // Bounded by the check in `new`
        self.duration_ms as i64
    }

    pub fn max_timestamp_ms(&self) -> Option<i64> {
        self.max_timestamp_ms
    }

    /// Lower bound of an explicit window.
    pub fn min_timestamp_ms(&self) -> Option<i64> {
        self.max_timestamp_ms
            .map(|max| max.saturating_sub(self.duration_ms_i64()))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = humantime::format_duration(Duration::from_millis(self.duration_ms));
        match self.max_timestamp_ms {
            Some(max) => write!(f, "[{duration}] @ {max}"),
            None => write!(f, "[{duration}]"),
        }
    }
}

/// A metric name, its label matchers and an optional time window.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub metric: MetricName,
    pub matchers: Vec<LabelMatcher>,
    pub window: Option<TimeWindow>,
}

impl Selector {
    /// Selector without label matchers or window
    pub fn new(metric: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            metric: MetricName::new(metric)?,
            matchers: Vec::new(),
            window: None,
        })
    }

    /// Add a label matcher
    pub fn with_matcher(mut self, matcher: LabelMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Scope the selector to a time window
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metric)?;
        if !self.matchers.is_empty() {
            let matchers: Vec<String> = self.matchers.iter().map(|m| m.to_string()).collect();
            write!(f, "{{{}}}", matchers.join(", "))?;
        }
        if let Some(window) = &self.window {
            write!(f, "{window}")?;
        }
        Ok(())
    }
}

/// Rollup functions over a window of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupKind {
    Rate,
    Increase,
    AvgOverTime,
    SumOverTime,
    MinOverTime,
    MaxOverTime,
    CountOverTime,
    QuantileOverTime,
}

impl RollupKind {
    pub fn from_function_name(name: &str) -> Option<Self> {
        match name {
            "rate" => Some(Self::Rate),
            "increase" => Some(Self::Increase),
            "avg_over_time" => Some(Self::AvgOverTime),
            "sum_over_time" => Some(Self::SumOverTime),
            "min_over_time" => Some(Self::MinOverTime),
            "max_over_time" => Some(Self::MaxOverTime),
            "count_over_time" => Some(Self::CountOverTime),
            "quantile_over_time" => Some(Self::QuantileOverTime),
            _ => None,
        }
    }

    pub fn function_name(&self) -> &'static str {
        match self {
            Self::Rate => "rate",
            Self::Increase => "increase",
            Self::AvgOverTime => "avg_over_time",
            Self::SumOverTime => "sum_over_time",
            Self::MinOverTime => "min_over_time",
            Self::MaxOverTime => "max_over_time",
            Self::CountOverTime => "count_over_time",
            Self::QuantileOverTime => "quantile_over_time",
        }
    }

    /// Example call shown in argument errors
    pub fn usage(&self) -> &'static str {
        match self {
            Self::QuantileOverTime => "quantile_over_time(0.95, http_request_duration_seconds[5m])",
            Self::Rate => "rate(http_requests_total[5m])",
            Self::Increase => "increase(http_requests_total[5m])",
            Self::AvgOverTime => "avg_over_time(node_load1[5m])",
            Self::SumOverTime => "sum_over_time(node_load1[5m])",
            Self::MinOverTime => "min_over_time(node_load1[5m])",
            Self::MaxOverTime => "max_over_time(node_load1[5m])",
            Self::CountOverTime => "count_over_time(node_load1[5m])",
        }
    }
}

impl fmt::Display for RollupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.function_name())
    }
}

/// A rollup applied to a windowed selector.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupSpec {
    kind: RollupKind,
    selector: Selector,
    window: TimeWindow,
    quantile: Option<f64>,
}

impl RollupSpec {
    /// Build a rollup. The selector must carry a time window, and `quantile`
    /// must be present (within `[0.0, 1.0]`) exactly for `quantile_over_time`.
    pub fn new(
        kind: RollupKind,
        selector: Selector,
        quantile: Option<f64>,
    ) -> Result<Self, CompileError> {
        let window = selector.window.ok_or_else(|| CompileError::MissingTimeWindow {
            function: kind.function_name().to_string(),
        })?;

        match (kind, quantile) {
            (RollupKind::QuantileOverTime, None) => {
                return Err(ValidationError::MissingQuantile {
                    function: kind.usage().to_string(),
                }
                .into());
            }
            (RollupKind::QuantileOverTime, Some(q)) if !(0.0..=1.0).contains(&q) => {
                return Err(ValidationError::QuantileOutOfRange {
                    function: "quantile_over_time(q, selector[window])".to_string(),
                    value: q,
                }
                .into());
            }
            (RollupKind::QuantileOverTime, Some(_)) => {}
            (_, Some(_)) => {
                return Err(ValidationError::UnexpectedQuantile {
                    function: kind.function_name().to_string(),
                }
                .into());
            }
            (_, None) => {}
        }

        Ok(Self {
            kind,
            selector,
            window,
            quantile,
        })
    }

    pub fn kind(&self) -> RollupKind {
        self.kind
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn quantile(&self) -> Option<f64> {
        self.quantile
    }
}

/// Aggregation operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    /// Requested as `stddev` or `stdvar`
    StdDev,
}

impl AggregationKind {
    pub fn from_operator(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            "stddev" | "stdvar" => Some(Self::StdDev),
            _ => None,
        }
    }

    /// SQL aggregate function for this operator
    pub fn sql_function(&self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Count => "COUNT",
            Self::StdDev => "STDDEV",
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Avg => write!(f, "avg"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Count => write!(f, "count"),
            Self::StdDev => write!(f, "stddev"),
        }
    }
}

/// `by (...)` / `without (...)` clause of an aggregation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupingModifier {
    #[default]
    None,
    By(Vec<LabelName>),
    Without(Vec<LabelName>),
}

impl GroupingModifier {
    /// `by (labels...)`, validating every name
    pub fn by(labels: &[&str]) -> Result<Self, ValidationError> {
        Ok(Self::By(parse_label_list("by", labels)?))
    }

    /// `without (labels...)`, validating every name
    pub fn without(labels: &[&str]) -> Result<Self, ValidationError> {
        Ok(Self::Without(parse_label_list("without", labels)?))
    }
}

fn parse_label_list(modifier: &str, labels: &[&str]) -> Result<Vec<LabelName>, ValidationError> {
    if labels.is_empty() {
        return Err(ValidationError::EmptyLabelList(modifier.to_string()));
    }
    labels.iter().map(|l| LabelName::new(l)).collect()
}

/// An aggregation and how it groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSpec {
    pub kind: AggregationKind,
    pub modifier: GroupingModifier,
    /// Group on extracted label values (`true`) or on the full label string
    pub canonical: bool,
}

impl AggregationSpec {
    pub fn new(
        kind: AggregationKind,
        modifier: GroupingModifier,
        canonical: bool,
    ) -> Result<Self, ValidationError> {
        match &modifier {
            GroupingModifier::By(labels) if labels.is_empty() => {
                return Err(ValidationError::EmptyLabelList("by".to_string()));
            }
            GroupingModifier::Without(labels) if labels.is_empty() => {
                return Err(ValidationError::EmptyLabelList("without".to_string()));
            }
            _ => {}
        }
        Ok(Self {
            kind,
            modifier,
            canonical,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    And,
    Or,
    Unless,
}

/// Binary operators between two expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Arithmetic(ArithmeticOp),
    Comparison(ComparisonOp),
    Set(SetOp),
}

impl BinaryOperator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "+" => Self::Arithmetic(ArithmeticOp::Add),
            "-" => Self::Arithmetic(ArithmeticOp::Sub),
            "*" => Self::Arithmetic(ArithmeticOp::Mul),
            "/" => Self::Arithmetic(ArithmeticOp::Div),
            "%" => Self::Arithmetic(ArithmeticOp::Mod),
            "==" => Self::Comparison(ComparisonOp::Eq),
            "!=" => Self::Comparison(ComparisonOp::NotEq),
            "<" => Self::Comparison(ComparisonOp::Lt),
            ">" => Self::Comparison(ComparisonOp::Gt),
            "<=" => Self::Comparison(ComparisonOp::LtEq),
            ">=" => Self::Comparison(ComparisonOp::GtEq),
            "and" => Self::Set(SetOp::And),
            "or" => Self::Set(SetOp::Or),
            "unless" => Self::Set(SetOp::Unless),
            _ => return None,
        };
        Some(op)
    }

    /// SQL operator; `None` for set operations, which are joins
    pub fn sql_operator(&self) -> Option<&'static str> {
        match self {
            Self::Arithmetic(ArithmeticOp::Add) => Some("+"),
            Self::Arithmetic(ArithmeticOp::Sub) => Some("-"),
            Self::Arithmetic(ArithmeticOp::Mul) => Some("*"),
            Self::Arithmetic(ArithmeticOp::Div) => Some("/"),
            Self::Arithmetic(ArithmeticOp::Mod) => Some("%"),
            Self::Comparison(ComparisonOp::Eq) => Some("="),
            Self::Comparison(ComparisonOp::NotEq) => Some("<>"),
            Self::Comparison(ComparisonOp::Lt) => Some("<"),
            Self::Comparison(ComparisonOp::Gt) => Some(">"),
            Self::Comparison(ComparisonOp::LtEq) => Some("<="),
            Self::Comparison(ComparisonOp::GtEq) => Some(">="),
            Self::Set(_) => None,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Arithmetic(ArithmeticOp::Add) => "+",
            Self::Arithmetic(ArithmeticOp::Sub) => "-",
            Self::Arithmetic(ArithmeticOp::Mul) => "*",
            Self::Arithmetic(ArithmeticOp::Div) => "/",
            Self::Arithmetic(ArithmeticOp::Mod) => "%",
            Self::Comparison(ComparisonOp::Eq) => "==",
            Self::Comparison(ComparisonOp::NotEq) => "!=",
            Self::Comparison(ComparisonOp::Lt) => "<",
            Self::Comparison(ComparisonOp::Gt) => ">",
            Self::Comparison(ComparisonOp::LtEq) => "<=",
            Self::Comparison(ComparisonOp::GtEq) => ">=",
            Self::Set(SetOp::And) => "and",
            Self::Set(SetOp::Or) => "or",
            Self::Set(SetOp::Unless) => "unless",
        };
        f.write_str(symbol)
    }
}

/// What a comparison produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonMode {
    /// The comparison result itself, as 1.0 / 0.0 (`bool` modifier)
    #[default]
    Bool,
    /// Keep rows where the comparison holds, with their left-hand value
    Filter,
}

/// Two compiled operands and the operator combining them.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOpSpec {
    pub op: BinaryOperator,
    pub left: SqlFragment,
    pub right: SqlFragment,
    pub left_is_scalar: bool,
    pub right_is_scalar: bool,
    pub comparison: ComparisonMode,
}

impl BinaryOpSpec {
    /// Vector on the left, vector or scalar on the right
    pub fn new(
        op: BinaryOperator,
        left: SqlFragment,
        right: SqlFragment,
        right_is_scalar: bool,
    ) -> Self {
        Self {
            op,
            left,
            right,
            left_is_scalar: false,
            right_is_scalar,
            comparison: ComparisonMode::default(),
        }
    }

    pub fn with_left_scalar(mut self, left_is_scalar: bool) -> Self {
        self.left_is_scalar = left_is_scalar;
        self
    }

    pub fn with_comparison(mut self, comparison: ComparisonMode) -> Self {
        self.comparison = comparison;
        self
    }
}
