//! Shared helper functions for CLI commands
//!
//! This module contains utility functions that are used across multiple
//! command modules to avoid code duplication.

use std::path::Path;

use miette::{IntoDiagnostic, Result};

use crate::cli::GlobalOpts;
use crate::core::{CacheError, Collection, Config, IndexLock, TrackCache};

/// Locate the collection from `--repo` or the current directory
pub fn discover_collection(global: &GlobalOpts) -> Result<Collection> {
    let collection = match &global.repo {
        Some(path) => Collection::discover_from(path)?,
        None => Collection::discover()?,
    };
    Ok(collection)
}

/// Collection, its layered configuration and its opened index
pub fn open_index(global: &GlobalOpts) -> Result<(Collection, Config, TrackCache)> {
    let collection = discover_collection(global)?;
    let config = Config::load(Some(&collection));
    let cache = TrackCache::open(&collection)?;
    Ok((collection, config, cache))
}

/// Remove a file if it exists
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).into_diagnostic(),
    }
}

/// Delete the index database and its WAL side files.
///
/// Holds the writer lock meanwhile, so a build in progress finishes first.
/// Returns whether anything was removed.
pub fn delete_index(db_path: &Path) -> Result<bool> {
    let lock_path = TrackCache::lock_path_for(db_path);
    let _lock = IndexLock::lock_exclusive(&lock_path).map_err(|source| CacheError::Lock {
        path: lock_path.clone(),
        source,
    })?;

    let mut removed = remove_if_exists(db_path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = db_path.as_os_str().to_os_string();
        side.push(suffix);
        removed |= remove_if_exists(Path::new(&side))?;
    }
    Ok(removed)
}

/// Truncate a string to max_len characters, adding "..." if truncated
///
/// Counts characters rather than bytes so tags with accents never split.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Format a byte count for status output
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{} KB", bytes / KB)
    }
}
