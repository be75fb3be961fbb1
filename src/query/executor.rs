//! Query execution against the track index
//!
//! A [`SearchQuery`] compiles to one SQL condition over `tracks t`. OR-groups
//! become `OR`, clauses within a group become `AND`, and multi-valued fields
//! are tested with `EXISTS` over their child rows. Running the compiled query
//! issues exactly one statement, whatever the size of the collection.

use rusqlite::types::Value;
use serde::Serialize;
use tracing::debug;

use super::ast::{Clause, FieldFilter, FilterOp, SearchQuery, TextTerm};
use super::error::QueryError;
use crate::core::cache::{CachedTrack, TrackCache};
use crate::core::field::{Field, FieldKind};

fn is_apostrophe(c: char) -> bool {
    c == '\'' || c == '\u{2019}'
}

/// Words of free text. Apostrophes inside a word keep it whole, so `don't`
/// stays one word; the index splits it and matches it as a phrase.
pub(crate) fn fts_tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && !is_apostrophe(c))
        .map(|t| t.trim_matches(is_apostrophe))
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .collect()
}

/// FTS5 match expression: every token as a prefix, all required
///
/// A token holding an apostrophe becomes a phrase whose last word is the
/// prefix, so `don't` needs `don` directly followed by a `t` word.
fn fts_expression(term: &TextTerm) -> String {
    fts_tokens(&term.value)
        .into_iter()
        .map(|token| format!("\"{}\"*", token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A validated query ready to run any number of times
#[derive(Debug, Clone, Serialize)]
pub struct CompiledQuery {
    condition: String,
    #[serde(serialize_with = "serialize_params")]
    params: Vec<Value>,
    limit: Option<usize>,
}

fn serialize_params<S: serde::Serializer>(params: &[Value], serializer: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(params.len()))?;
    for param in params {
        match param {
            Value::Null => seq.serialize_element(&Option::<()>::None)?,
            Value::Integer(i) => seq.serialize_element(i)?,
            Value::Real(f) => seq.serialize_element(f)?,
            Value::Text(s) => seq.serialize_element(s)?,
            Value::Blob(b) => seq.serialize_element(b)?,
        }
    }
    seq.end()
}

impl CompiledQuery {
    /// Validate and translate a query. Fails before touching the index.
    pub fn compile(query: &SearchQuery) -> Result<Self, QueryError> {
        for clause in query.groups.iter().flat_map(|g| g.clauses.iter()) {
            match clause {
                Clause::Filter(filter) => filter.validate()?,
                Clause::Text(term) if fts_tokens(&term.value).is_empty() => {
                    return Err(QueryError::syntax(
                        &term.value,
                        0..term.value.len(),
                        "search text has no letters or digits",
                        None,
                    ));
                }
                Clause::Text(_) => {}
            }
        }

        let mut params = Vec::new();
        let groups: Vec<String> = query
            .groups
            .iter()
            .map(|group| {
                if group.clauses.is_empty() {
                    return "1".to_string();
                }
                let conditions: Vec<String> = group
                    .clauses
                    .iter()
                    .map(|clause| clause_condition(clause, &mut params))
                    .collect();
                format!("({})", conditions.join(" AND "))
            })
            .collect();

        let condition = if groups.is_empty() {
            "0".to_string()
        } else {
            groups.join(" OR ")
        };

        Ok(Self {
            condition,
            params,
            limit: None,
        })
    }

    /// Stop after `limit` rows
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// The SQL condition, for `--explain`
    pub fn condition(&self) -> &str {
        &self.condition
    }

    /// Stream matching tracks, ordered by path. Returns the number visited.
    pub fn for_each<F>(&self, cache: &TrackCache, visit: F) -> Result<usize, QueryError>
    where
        F: FnMut(CachedTrack),
    {
        debug!(condition = %self.condition, params = self.params.len(), "running query");
        Ok(cache.select_tracks(&self.condition, &self.params, self.limit, visit)?)
    }

    /// Collect matching tracks, ordered by path
    pub fn collect(&self, cache: &TrackCache) -> Result<Vec<CachedTrack>, QueryError> {
        let mut tracks = Vec::new();
        self.for_each(cache, |track| tracks.push(track))?;
        Ok(tracks)
    }

    /// Number of matching tracks, ignoring the limit
    pub fn count(&self, cache: &TrackCache) -> Result<usize, QueryError> {
        Ok(cache.count_tracks(&self.condition, &self.params)?)
    }
}

/// Compile and run a query in one go
pub fn execute(query: &SearchQuery, cache: &TrackCache) -> Result<Vec<CachedTrack>, QueryError> {
    CompiledQuery::compile(query)?.collect(cache)
}

fn clause_condition(clause: &Clause, params: &mut Vec<Value>) -> String {
    let (condition, negated) = match clause {
        Clause::Text(term) => {
            params.push(Value::Text(fts_expression(term)));
            (
                "t.rowid IN (SELECT rowid FROM tracks_fts WHERE tracks_fts MATCH ?)".to_string(),
                term.negated,
            )
        }
        Clause::Filter(filter) => (filter_condition(filter, params), filter.negated),
    };

    if negated {
        // An unset field never satisfies the inner condition
        format!("NOT COALESCE(({}), 0)", condition)
    } else {
        condition
    }
}

fn filter_condition(filter: &FieldFilter, params: &mut Vec<Value>) -> String {
    match filter.field.kind() {
        FieldKind::Text => text_condition(filter.field, &filter.op, params),
        FieldKind::Numeric => numeric_condition(filter.field, &filter.op, params),
        FieldKind::Multi => multi_condition(filter.field, &filter.op, params),
    }
}

fn column(field: Field) -> String {
    format!("t.{}", field.column().unwrap_or("path"))
}

fn text_condition(field: Field, op: &FilterOp, params: &mut Vec<Value>) -> String {
    let col = column(field);
    match op {
        FilterOp::Contains(value) => {
            params.push(Value::Text(value.to_lowercase()));
            format!("instr(casefold({}), ?) > 0", col)
        }
        FilterOp::Equals(value) => {
            params.push(Value::Text(value.to_lowercase()));
            format!("casefold({}) = ?", col)
        }
        FilterOp::Empty if field == Field::Path => "0".to_string(),
        FilterOp::Empty => format!("{} IS NULL", col),
        // rejected by validation
        _ => "0".to_string(),
    }
}

fn numeric_condition(field: Field, op: &FilterOp, params: &mut Vec<Value>) -> String {
    let col = column(field);
    let (sql_op, n) = match op {
        FilterOp::Contains(value) | FilterOp::Equals(value) => {
            ("=", value.trim().parse().unwrap_or(f64::NAN))
        }
        FilterOp::GreaterThan(n) => (">", *n),
        FilterOp::LessThan(n) => ("<", *n),
        FilterOp::AtLeast(n) => (">=", *n),
        FilterOp::AtMost(n) => ("<=", *n),
        FilterOp::Range { start, end } => {
            params.push(Value::Real(*start));
            params.push(Value::Real(*end));
            return format!("{} BETWEEN ? AND ?", col);
        }
        FilterOp::Empty => return format!("{} IS NULL", col),
    };
    params.push(Value::Real(n));
    format!("{} {} ?", col, sql_op)
}

fn multi_condition(field: Field, op: &FilterOp, params: &mut Vec<Value>) -> String {
    const VALUES: &str = "SELECT 1 FROM track_values v WHERE v.key = t.key AND v.field = ?";
    params.push(Value::Text(field.as_str().to_string()));
    match op {
        FilterOp::Contains(value) => {
            params.push(Value::Text(value.to_lowercase()));
            format!("EXISTS ({} AND instr(casefold(v.value), ?) > 0)", VALUES)
        }
        FilterOp::Equals(value) => {
            params.push(Value::Text(value.to_lowercase()));
            format!("EXISTS ({} AND casefold(v.value) = ?)", VALUES)
        }
        FilterOp::Empty => format!("NOT EXISTS ({})", VALUES),
        // rejected by validation
        _ => "0".to_string(),
    }
}
