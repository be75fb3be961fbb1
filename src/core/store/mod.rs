//! Read-only access to the metadata store
//!
//! The index only consumes a handful of plumbing operations from the
//! version-controlled store. They are collected in [`MetadataStore`] so the
//! builder can run against git-annex or an in-memory stand-in.

mod annex;
pub mod memory;

pub use annex::AnnexStore;
pub use memory::MemoryStore;

use std::collections::HashMap;

use crate::core::git::GitError;

/// Suffix of per-key metadata log files on the metadata branch
pub const METADATA_SUFFIX: &str = ".log.met";

/// A metadata log object on the branch
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetadataObject {
    pub key: String,
    pub blob: String,
}

/// A changed metadata log between two commits; `blob` is `None` when the
/// log was deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChange {
    pub key: String,
    pub blob: Option<String>,
}

/// Outcome of diffing two branch commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeDiff {
    Changes(Vec<ObjectChange>),
    /// The earlier commit is gone or no longer an ancestor
    RewriteDetected,
}

/// Where a key's file lives in the working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackLocation {
    pub path: String,
    pub present: bool,
}

/// Operations consumed from the metadata store
pub trait MetadataStore {
    /// Commit at the tip of `branch`, `None` if the branch does not exist
    fn branch_tip(&self, branch: &str) -> Result<Option<String>, GitError>;

    /// Commit checked out in the working tree, `None` when unborn
    fn head_commit(&self) -> Result<Option<String>, GitError>;

    /// All metadata log objects in a commit
    fn list_metadata_objects(&self, commit: &str) -> Result<Vec<MetadataObject>, GitError>;

    /// Metadata log objects changed between two commits
    fn tree_diff(&self, from: &str, to: &str) -> Result<TreeDiff, GitError>;

    /// Contents of many blobs in one bulk read
    fn read_blobs(&self, blobs: &[String]) -> Result<HashMap<String, Vec<u8>>, GitError>;

    /// Working-tree location of each key that maps to a file, whether or not
    /// its content is present. Keys without a file are left out.
    fn map_keys_to_paths(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, TrackLocation>, GitError>;
}

/// Extract the key from a metadata log path such as `f87/4d5/KEY.log.met`
///
/// File names on the branch carry the escaped form of the key (see
/// [`escape_key`]), so the name is unescaped before it is returned.
pub fn key_from_log_path(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    name.strip_suffix(METADATA_SUFFIX)
        .filter(|k| !k.is_empty())
        .map(unescape_key)
}

/// Escape a key for use as a file name: `&` becomes `&a`, `%` becomes `&s`,
/// `:` becomes `&c` and `/` becomes `%`
pub fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '&' => escaped.push_str("&a"),
            '%' => escaped.push_str("&s"),
            ':' => escaped.push_str("&c"),
            '/' => escaped.push('%'),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Inverse of [`escape_key`]. An `&` not followed by `a`, `s` or `c` is kept.
pub fn unescape_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '%' => key.push('/'),
            '&' => match chars.peek() {
                Some('a') => {
                    chars.next();
                    key.push('&');
                }
                Some('s') => {
                    chars.next();
                    key.push('%');
                }
                Some('c') => {
                    chars.next();
                    key.push(':');
                }
                _ => key.push('&'),
            },
            c => key.push(c),
        }
    }
    key
}
