//! Parsed form of a search query
//!
//! A query is a list of OR-groups; each group is a list of clauses that must
//! all hold. Nothing here is mutated after parsing, so one query can be
//! compiled and executed any number of times.

use std::fmt;

use serde::Serialize;

use super::error::QueryError;
use crate::core::field::{Field, FieldKind};

/// A whole query: the union of its groups
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub groups: Vec<OrGroup>,
}

impl SearchQuery {
    /// A query matching every indexed track
    pub fn match_all() -> Self {
        Self {
            groups: vec![OrGroup::default()],
        }
    }
}

/// Clauses that must all match
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrGroup {
    pub clauses: Vec<Clause>,
}

/// One condition of a group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Clause {
    Text(TextTerm),
    Filter(FieldFilter),
}

/// Free text matched against the full-text fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextTerm {
    pub value: String,
    pub negated: bool,
}

impl TextTerm {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            negated: false,
        }
    }
}

/// A condition on one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFilter {
    pub field: Field,
    pub op: FilterOp,
    pub negated: bool,
}

impl FieldFilter {
    pub fn new(field: Field, op: FilterOp) -> Self {
        Self {
            field,
            op,
            negated: false,
        }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Check the operator and operand against the field's kind
    pub fn validate(&self) -> Result<(), QueryError> {
        let kind = self.field.kind();
        if self.op.is_numeric_only() && kind != FieldKind::Numeric {
            return Err(QueryError::field_type(
                self.field,
                format!("'{}' needs a numeric field", self.op.name()),
            ));
        }

        match &self.op {
            FilterOp::Contains(value) | FilterOp::Equals(value) if kind == FieldKind::Numeric => {
                match value.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => Ok(()),
                    _ => Err(QueryError::field_type(
                        self.field,
                        format!("'{}' is not a number", value),
                    )),
                }
            }
            FilterOp::GreaterThan(n)
            | FilterOp::LessThan(n)
            | FilterOp::AtLeast(n)
            | FilterOp::AtMost(n)
                if !n.is_finite() =>
            {
                Err(QueryError::field_type(self.field, "comparison needs a finite number"))
            }
            FilterOp::Range { start, end }
                if !start.is_finite() || !end.is_finite() || start > end =>
            {
                Err(QueryError::field_type(
                    self.field,
                    format!("range {}-{} is not a valid interval", start, end),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Filter operator with its operand
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FilterOp {
    /// Case-insensitive substring (the default)
    Contains(String),
    /// Case-insensitive exact match
    Equals(String),
    GreaterThan(f64),
    LessThan(f64),
    AtLeast(f64),
    AtMost(f64),
    /// Inclusive on both ends
    Range { start: f64, end: f64 },
    /// The field is unset
    Empty,
}

impl FilterOp {
    /// Operators that only make sense on numeric fields
    pub fn is_numeric_only(&self) -> bool {
        matches!(
            self,
            FilterOp::GreaterThan(_)
                | FilterOp::LessThan(_)
                | FilterOp::AtLeast(_)
                | FilterOp::AtMost(_)
                | FilterOp::Range { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterOp::Contains(_) => "contains",
            FilterOp::Equals(_) => "equals",
            FilterOp::GreaterThan(_) => "greater_than",
            FilterOp::LessThan(_) => "less_than",
            FilterOp::AtLeast(_) => "at_least",
            FilterOp::AtMost(_) => "at_most",
            FilterOp::Range { .. } => "range",
            FilterOp::Empty => "empty",
        }
    }
}

impl fmt::Display for FieldFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "-")?;
        }
        write!(f, "{}:", self.field)?;
        match &self.op {
            FilterOp::Contains(v) => write!(f, "{}", quote_if_needed(v)),
            FilterOp::Equals(v) => write!(f, "={}", quote_if_needed(v)),
            FilterOp::GreaterThan(n) => write!(f, ">{}", n),
            FilterOp::LessThan(n) => write!(f, "<{}", n),
            FilterOp::AtLeast(n) => write!(f, ">={}", n),
            FilterOp::AtMost(n) => write!(f, "<={}", n),
            FilterOp::Range { start, end } => write!(f, "{}-{}", start, end),
            FilterOp::Empty => write!(f, "\"\""),
        }
    }
}

impl fmt::Display for TextTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "-")?;
        }
        write!(f, "{}", quote_if_needed(&self.value))
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Text(term) => term.fmt(f),
            Clause::Filter(filter) => filter.fmt(f),
        }
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            for (j, clause) in group.clauses.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", clause)?;
            }
        }
        Ok(())
    }
}

fn quote_if_needed(value: &str) -> String {
    let plain = !value.is_empty()
        && !value.starts_with(['-', '=', '<', '>'])
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '"' | '|' | '\\' | ':'));
    if plain && value != "OR" {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}
