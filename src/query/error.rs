//! Query errors with source spans

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

use crate::core::cache::CacheError;
use crate::core::field::{Field, FieldKind};

/// Errors raised while parsing, validating or running a query
#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    /// Malformed query text
    #[error("query syntax error: {message}")]
    #[diagnostic(code(crate_index::query::syntax))]
    Syntax {
        #[source_code]
        src: String,
        #[label("here")]
        span: SourceSpan,
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("unknown field '{name}'")]
    #[diagnostic(
        code(crate_index::query::unknown_field),
        help("run `crate-index fields` to list the known fields")
    )]
    UnknownField {
        #[source_code]
        src: String,
        #[label("not a known field")]
        span: SourceSpan,
        name: String,
    },

    /// An operator or value that doesn't fit the field's type
    #[error("{field} is a {kind} field: {message}")]
    #[diagnostic(code(crate_index::query::field_type))]
    FieldType {
        #[source_code]
        src: String,
        #[label("here")]
        span: Option<SourceSpan>,
        field: Field,
        kind: FieldKind,
        message: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),
}

impl QueryError {
    pub(crate) fn syntax(
        src: &str,
        span: impl Into<SourceSpan>,
        message: impl Into<String>,
        help: Option<&str>,
    ) -> Self {
        QueryError::Syntax {
            src: src.to_string(),
            span: span.into(),
            message: message.into(),
            help: help.map(str::to_string),
        }
    }

    pub(crate) fn field_type(field: Field, message: impl Into<String>) -> Self {
        QueryError::FieldType {
            src: String::new(),
            span: None,
            field,
            kind: field.kind(),
            message: message.into(),
        }
    }

    /// Attach the query text and position to a field type error
    pub(crate) fn at(self, src: &str, span: impl Into<SourceSpan>) -> Self {
        match self {
            QueryError::FieldType {
                field,
                kind,
                message,
                ..
            } => QueryError::FieldType {
                src: src.to_string(),
                span: Some(span.into()),
                field,
                kind,
                message,
            },
            other => other,
        }
    }
}
