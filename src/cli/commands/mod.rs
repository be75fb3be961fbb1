//! CLI command implementations

pub mod completions;
pub mod fields;
pub mod index;
pub mod search;
