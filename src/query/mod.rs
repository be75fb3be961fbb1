//! Search query language
//!
//! Query text is parsed into a [`SearchQuery`], validated against the known
//! fields and compiled into a single statement over the track index:
//!
//! ```text
//! artist:burial bpm:>130 -genre:ambient | crate:=Peak rating:4-5
//! ```
//!
//! - whitespace separates clauses, which must all match
//! - `|` or `OR` separates groups, any of which may match
//! - `-` in front of a clause negates it
//! - bare words and quoted strings search the text fields

pub mod ast;
pub mod error;
pub mod executor;
pub mod parser;

pub use ast::{Clause, FieldFilter, FilterOp, OrGroup, SearchQuery, TextTerm};
pub use error::QueryError;
pub use executor::{execute, CompiledQuery};
pub use parser::parse;
