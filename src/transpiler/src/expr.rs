//! Typed MetricsQL expression tree
//!
//! This is the input of [`crate::transform::Transformer`]. It is produced
//! either by [`crate::parser`] from query text or built directly by callers.
//! Function, aggregation and operator names stay as strings here so that the
//! dispatcher can report unknown ones as compile errors.

use std::fmt;

use crate::types::{ComparisonMode, GroupingModifier, Selector};

/// A MetricsQL expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `metric{matchers}[window]`
    Selector(Selector),
    /// `name(args...)`: rollups and label functions
    FunctionCall { name: String, args: Vec<Expr> },
    /// `func by (labels) (expr)`
    Aggregation {
        func: String,
        expr: Box<Expr>,
        modifier: GroupingModifier,
    },
    /// `left op right`
    BinaryOp {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
        comparison: ComparisonMode,
    },
    /// `(expr)`
    Paren(Box<Expr>),
    NumberLiteral(f64),
    StringLiteral(String),
}

impl Expr {
    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::FunctionCall {
            name: name.to_string(),
            args,
        }
    }

    pub fn aggregate(func: &str, expr: Expr, modifier: GroupingModifier) -> Self {
        Self::Aggregation {
            func: func.to_string(),
            expr: Box::new(expr),
            modifier,
        }
    }

    /// Binary operation; comparisons produce 1.0 / 0.0.
    pub fn binary(op: &str, left: Expr, right: Expr) -> Self {
        Self::BinaryOp {
            op: op.to_string(),
            left: Box::new(left),
            right: Box::new(right),
            comparison: ComparisonMode::Bool,
        }
    }

    /// Comparison that keeps matching rows instead of producing 1.0 / 0.0.
    pub fn filter(op: &str, left: Expr, right: Expr) -> Self {
        Self::BinaryOp {
            op: op.to_string(),
            left: Box::new(left),
            right: Box::new(right),
            comparison: ComparisonMode::Filter,
        }
    }

    pub fn paren(expr: Expr) -> Self {
        Self::Paren(Box::new(expr))
    }

    pub fn string(value: &str) -> Self {
        Self::StringLiteral(value.to_string())
    }

    /// Strip any number of enclosing parentheses.
    pub fn unwrap_parens(&self) -> &Expr {
        let mut expr = self;
        while let Self::Paren(inner) = expr {
            expr = inner;
        }
        expr
    }

    /// Metric names referenced anywhere in the tree, in visit order
    pub fn metric_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_metric_names(&mut names);
        names
    }

    fn collect_metric_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Selector(selector) => {
                let name = selector.metric.as_str();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            Self::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_metric_names(names);
                }
            }
            Self::Aggregation { expr, .. } | Self::Paren(expr) => expr.collect_metric_names(names),
            Self::BinaryOp { left, right, .. } => {
                left.collect_metric_names(names);
                right.collect_metric_names(names);
            }
            Self::NumberLiteral(_) | Self::StringLiteral(_) => {}
        }
    }
}

impl From<Selector> for Expr {
    fn from(selector: Selector) -> Self {
        Self::Selector(selector)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::NumberLiteral(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selector(selector) => write!(f, "{selector}"),
            Self::FunctionCall { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{name}({})", args.join(", "))
            }
            Self::Aggregation {
                func,
                expr,
                modifier,
            } => match modifier {
                GroupingModifier::None => write!(f, "{func}({expr})"),
                GroupingModifier::By(labels) | GroupingModifier::Without(labels) => {
                    let keyword = if matches!(modifier, GroupingModifier::By(_)) {
                        "by"
                    } else {
                        "without"
                    };
                    let labels: Vec<&str> = labels.iter().map(|l| l.as_str()).collect();
                    write!(f, "{func} {keyword} ({}) ({expr})", labels.join(", "))
                }
            },
            Self::BinaryOp {
                op,
                left,
                right,
                comparison,
            } => {
                let is_comparison = matches!(op.as_str(), "==" | "!=" | "<" | ">" | "<=" | ">=");
                if is_comparison && *comparison == ComparisonMode::Bool {
                    write!(f, "{left} {op} bool {right}")
                } else {
                    write!(f, "{left} {op} {right}")
                }
            }
            Self::Paren(expr) => write!(f, "({expr})"),
            Self::NumberLiteral(value) => write!(f, "{value}"),
            Self::StringLiteral(value) => write!(f, "{value:?}"),
        }
    }
}
