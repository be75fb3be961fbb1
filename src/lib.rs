//! crate-index: fast metadata search for git-annex music collections
//!
//! Mirrors the per-file metadata logs on the `git-annex` branch into a local
//! SQLite index and evaluates a compact query language against it.

pub mod cli;
pub mod core;
pub mod query;
