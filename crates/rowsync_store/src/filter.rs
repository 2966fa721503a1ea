//! Structured, parameterized row filters.
//!
//! The original system assembled SQL text with a regex identifier
//! sanitizer; this filter replaces that entirely. Conditions are data,
//! values are never spliced into query strings.

use rowsync_protocol::Row;
use serde_json::Value;

/// A single condition over one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// Column equals the value (null matches null or a missing column).
    Eq(String, Value),
    /// Column value is one of the listed values.
    In(String, Vec<Value>),
    /// Column is null or missing.
    IsNull(String),
    /// Column is present and not null.
    NotNull(String),
    /// Integer column strictly greater than the bound.
    Gt(String, i64),
    /// Integer column less than or equal to the bound.
    Le(String, i64),
    /// Any of the nested conditions holds.
    Or(Vec<Cond>),
}

impl Cond {
    /// Equality condition.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Cond::Eq(column.into(), value.into())
    }

    /// Null-or-missing condition.
    pub fn is_null(column: impl Into<String>) -> Self {
        Cond::IsNull(column.into())
    }

    fn matches(&self, row: &Row) -> bool {
        match self {
            Cond::Eq(col, value) => loose_eq(row.get(col).unwrap_or(&Value::Null), value),
            Cond::In(col, values) => match row.get(col) {
                Some(actual) => values.iter().any(|v| loose_eq(actual, v)),
                None => false,
            },
            Cond::IsNull(col) => matches!(row.get(col), None | Some(Value::Null)),
            Cond::NotNull(col) => !matches!(row.get(col), None | Some(Value::Null)),
            Cond::Gt(col, bound) => row.get(col).and_then(Value::as_i64).is_some_and(|v| v > *bound),
            Cond::Le(col, bound) => {
                row.get(col).and_then(Value::as_i64).is_some_and(|v| v <= *bound)
            }
            Cond::Or(conds) => conds.iter().any(|c| c.matches(row)),
        }
    }
}

/// Equality that treats 1 and 1.0 as the same value.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// A conjunction of [`Cond`]s; an empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    conds: Vec<Cond>,
}

impl Where {
    /// A filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds an equality condition.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conds.push(Cond::Eq(column.into(), value.into()));
        self
    }

    /// Adds a membership condition over integer keys.
    pub fn in_refs(mut self, column: impl Into<String>, refs: &[i64]) -> Self {
        self.conds.push(Cond::In(
            column.into(),
            refs.iter().map(|r| Value::from(*r)).collect(),
        ));
        self
    }

    /// Adds a null-or-missing condition.
    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.conds.push(Cond::IsNull(column.into()));
        self
    }

    /// Adds a not-null condition.
    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        self.conds.push(Cond::NotNull(column.into()));
        self
    }

    /// Adds a strictly-greater-than condition.
    pub fn gt(mut self, column: impl Into<String>, bound: i64) -> Self {
        self.conds.push(Cond::Gt(column.into(), bound));
        self
    }

    /// Adds a less-than-or-equal condition.
    pub fn le(mut self, column: impl Into<String>, bound: i64) -> Self {
        self.conds.push(Cond::Le(column.into(), bound));
        self
    }

    /// Adds a disjunction of conditions.
    pub fn any(mut self, conds: Vec<Cond>) -> Self {
        self.conds.push(Cond::Or(conds));
        self
    }

    /// Returns true if the row satisfies every condition.
    pub fn matches(&self, row: &Row) -> bool {
        self.conds.iter().all(|c| c.matches(row))
    }
}
