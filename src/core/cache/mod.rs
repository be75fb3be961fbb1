//! SQLite-backed track index
//!
//! This module provides a local SQLite cache that:
//! - Mirrors the resolved metadata of every key that maps to a file
//! - Keeps a full-text index over the descriptive text fields
//! - Records which branch commit it reflects, so refreshes can be incremental
//! - Supports direct read-only SQL queries for power users
//!
//! IMPORTANT: The index is disposable. Deleting it and running a full build
//! is always a safe recovery path; nothing here is ever written back to the
//! metadata branch.

mod queries;
mod schema;
mod sync;
mod types;

// Re-export all types
pub use types::*;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use crate::core::collection::Collection;
use crate::core::git::GitError;

/// Current schema version - index is rebuilt on version mismatch
const SCHEMA_VERSION: i32 = 3;

/// Errors raised by the index
#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cannot open index at {path}: {reason}")]
    #[diagnostic(
        code(crate_index::cache::unavailable),
        help("remove the index file and run `crate-index index build --full`")
    )]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("index lock {path}: {source}")]
    #[diagnostic(code(crate_index::cache::lock))]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index query failed: {0}")]
    #[diagnostic(code(crate_index::cache::sqlite))]
    Sqlite(#[from] rusqlite::Error),

    #[error("only read-only statements are allowed")]
    #[diagnostic(code(crate_index::cache::not_read_only))]
    NotReadOnly,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Git(#[from] GitError),
}

/// The track index backed by SQLite
pub struct TrackCache {
    conn: Connection,
    db_path: PathBuf,
}

impl TrackCache {
    /// Open or create the index of a collection
    pub fn open(collection: &Collection) -> Result<Self, CacheError> {
        Self::open_at(&collection.index_path())
    }

    /// Open or create an index at an explicit path
    ///
    /// A new or outdated database gets a fresh schema with no cache state,
    /// so the next build is a full one.
    pub fn open_at(path: &Path) -> Result<Self, CacheError> {
        let unavailable = |reason: String| CacheError::StoreUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;

        // WAL lets readers proceed while a build is writing
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| unavailable(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(10))
            .map_err(|e| unavailable(e.to_string()))?;
        queries::register_functions(&conn).map_err(|e| unavailable(e.to_string()))?;

        let mut cache = Self {
            conn,
            db_path: path.to_path_buf(),
        };

        if cache.needs_schema_rebuild()? {
            cache.reinitialize_schema()?;
        }

        Ok(cache)
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Lock file serializing writers of this index
    pub fn lock_path(&self) -> PathBuf {
        Self::lock_path_for(&self.db_path)
    }

    /// Lock file guarding the database at `db_path`
    pub fn lock_path_for(db_path: &Path) -> PathBuf {
        db_path.with_extension("lock")
    }

    /// Check if schema version matches current version
    fn needs_schema_rebuild(&self) -> Result<bool, CacheError> {
        let current_version: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()
            .unwrap_or(None);

        Ok(current_version != Some(SCHEMA_VERSION))
    }

    /// Drop all tables and recreate the schema (no migrations needed)
    fn reinitialize_schema(&mut self) -> Result<(), CacheError> {
        self.conn.execute_batch(
            r#"
            DROP TRIGGER IF EXISTS tracks_ai;
            DROP TRIGGER IF EXISTS tracks_ad;
            DROP TRIGGER IF EXISTS tracks_au;
            DROP TABLE IF EXISTS tracks_fts;
            DROP TABLE IF EXISTS track_values;
            DROP TABLE IF EXISTS tracks;
            DROP TABLE IF EXISTS meta_objects;
            DROP TABLE IF EXISTS cache_state;
            DROP TABLE IF EXISTS schema_version;
            "#,
        )?;

        self.init_schema()
    }

    /// The "last synchronized" record, `None` before the first build
    pub fn state(&self) -> Result<Option<CacheState>, CacheError> {
        let state = self
            .conn
            .query_row(
                r#"SELECT branch, branch_commit, head_commit, keys_total, warnings, synced_at
                   FROM cache_state WHERE id = 1"#,
                [],
                |row| {
                    Ok(CacheState {
                        branch: row.get(0)?,
                        branch_commit: row.get(1)?,
                        head_commit: row.get(2)?,
                        keys_total: row.get::<_, i64>(3)? as usize,
                        warnings: row.get::<_, i64>(4)? as usize,
                        synced_at: parse_datetime(row.get::<_, String>(5)?),
                    })
                },
            )
            .optional()?;

        Ok(state)
    }

    /// Number of indexed tracks
    pub fn track_count(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get index statistics
    pub fn statistics(&self) -> Result<CacheStats, CacheError> {
        let total_tracks = self.track_count()?;

        let present_tracks: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tracks WHERE present = 1",
            [],
            |row| row.get(0),
        )?;

        let metadata_objects: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM meta_objects", [], |row| row.get(0))?;

        let mut values_by_field = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT field, COUNT(*) FROM track_values GROUP BY field")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            for row in rows {
                let (field, count) = row?;
                values_by_field.insert(field, count as usize);
            }
        }

        let db_size_bytes = fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);

        Ok(CacheStats {
            total_tracks,
            present_tracks: present_tracks as usize,
            metadata_objects: metadata_objects as usize,
            values_by_field,
            db_size_bytes,
        })
    }

    /// Execute raw SQL query (read-only)
    pub fn query_raw(&self, sql: &str) -> Result<Vec<Vec<String>>, CacheError> {
        let mut stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(CacheError::NotReadOnly);
        }
        let column_count = stmt.column_count();

        let rows = stmt.query_map([], |row| {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value: String = row
                    .get::<_, rusqlite::types::Value>(i)
                    .map(|v| match v {
                        rusqlite::types::Value::Null => "NULL".to_string(),
                        rusqlite::types::Value::Integer(i) => i.to_string(),
                        rusqlite::types::Value::Real(f) => f.to_string(),
                        rusqlite::types::Value::Text(s) => s,
                        rusqlite::types::Value::Blob(_) => "<blob>".to_string(),
                    })
                    .unwrap_or_default();
                values.push(value);
            }
            Ok(values)
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Get column names for a query
    pub fn query_columns(&self, sql: &str) -> Result<Vec<String>, CacheError> {
        let stmt = self.conn.prepare(sql)?;
        Ok(stmt.column_names().iter().map(|s| s.to_string()).collect())
    }

    /// Remove every row and the cache state; the next build is full
    pub fn clear(&mut self) -> Result<(), CacheError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            r#"
            DELETE FROM track_values;
            DELETE FROM tracks;
            DELETE FROM meta_objects;
            DELETE FROM cache_state;
            "#,
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Parse datetime string to DateTime<Utc>
fn parse_datetime(s: String) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
