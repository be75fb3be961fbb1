//! Database schema initialization and row writers

use rusqlite::{params, Connection};

use super::{CacheError, CacheState, CachedTrack, TrackCache, SCHEMA_VERSION};
use crate::core::field::Field;

impl TrackCache {
    /// Initialize database schema
    pub(super) fn init_schema(&mut self) -> Result<(), CacheError> {
        self.conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            -- One row per key that maps to a working-tree file
            CREATE TABLE IF NOT EXISTS tracks (
                key TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                present INTEGER NOT NULL,
                artist TEXT,
                title TEXT,
                album TEXT,
                genre TEXT,
                label TEXT,
                comment TEXT,
                year REAL,
                bpm REAL,
                rating REAL
            );
            CREATE INDEX IF NOT EXISTS idx_tracks_path ON tracks(path);
            CREATE INDEX IF NOT EXISTS idx_tracks_bpm ON tracks(bpm);
            CREATE INDEX IF NOT EXISTS idx_tracks_rating ON tracks(rating);
            CREATE INDEX IF NOT EXISTS idx_tracks_year ON tracks(year);

            -- Multi-valued fields (crate, tag)
            CREATE TABLE IF NOT EXISTS track_values (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field, value)
            );
            CREATE INDEX IF NOT EXISTS idx_track_values_field ON track_values(field, value);

            -- Every metadata log on the branch, mapped or not
            CREATE TABLE IF NOT EXISTS meta_objects (
                key TEXT PRIMARY KEY,
                blob TEXT NOT NULL
            );

            -- Singleton "last synchronized" record
            CREATE TABLE IF NOT EXISTS cache_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                branch TEXT NOT NULL,
                branch_commit TEXT,
                head_commit TEXT,
                keys_total INTEGER NOT NULL,
                warnings INTEGER NOT NULL,
                synced_at TEXT NOT NULL
            );

            -- Full-text search over the descriptive text fields
            CREATE VIRTUAL TABLE IF NOT EXISTS tracks_fts USING fts5(
                artist,
                title,
                album,
                genre,
                label,
                comment,
                content='tracks',
                content_rowid='rowid',
                tokenize='unicode61 remove_diacritics 2'
            );

            CREATE TRIGGER IF NOT EXISTS tracks_ai AFTER INSERT ON tracks BEGIN
                INSERT INTO tracks_fts(rowid, artist, title, album, genre, label, comment)
                VALUES (new.rowid, new.artist, new.title, new.album, new.genre, new.label, new.comment);
            END;
            CREATE TRIGGER IF NOT EXISTS tracks_ad AFTER DELETE ON tracks BEGIN
                INSERT INTO tracks_fts(tracks_fts, rowid, artist, title, album, genre, label, comment)
                VALUES ('delete', old.rowid, old.artist, old.title, old.album, old.genre, old.label, old.comment);
            END;
            CREATE TRIGGER IF NOT EXISTS tracks_au AFTER UPDATE ON tracks BEGIN
                INSERT INTO tracks_fts(tracks_fts, rowid, artist, title, album, genre, label, comment)
                VALUES ('delete', old.rowid, old.artist, old.title, old.album, old.genre, old.label, old.comment);
                INSERT INTO tracks_fts(rowid, artist, title, album, genre, label, comment)
                VALUES (new.rowid, new.artist, new.title, new.album, new.genre, new.label, new.comment);
            END;
            "#,
        )?;

        self.conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;

        Ok(())
    }
}

/// Insert a track and its multi-valued children
pub(super) fn insert_track(conn: &Connection, track: &CachedTrack) -> Result<(), CacheError> {
    conn.execute(
        r#"INSERT INTO tracks
           (key, path, present, artist, title, album, genre, label, comment, year, bpm, rating)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
        params![
            track.key,
            track.path,
            track.present,
            track.artist,
            track.title,
            track.album,
            track.genre,
            track.label,
            track.comment,
            track.year,
            track.bpm,
            track.rating
        ],
    )?;

    let mut stmt = conn
        .prepare_cached("INSERT OR IGNORE INTO track_values (key, field, value) VALUES (?1, ?2, ?3)")?;
    for field in [Field::Crate, Field::Tag] {
        for value in track.values(field) {
            stmt.execute(params![track.key, field.as_str(), value])?;
        }
    }

    Ok(())
}

/// Delete a track and its children
pub(super) fn delete_track(conn: &Connection, key: &str) -> Result<(), CacheError> {
    conn.execute("DELETE FROM track_values WHERE key = ?1", params![key])?;
    conn.execute("DELETE FROM tracks WHERE key = ?1", params![key])?;
    Ok(())
}

/// Replace a track and all of its children wholesale
pub(super) fn replace_track(conn: &Connection, track: &CachedTrack) -> Result<(), CacheError> {
    delete_track(conn, &track.key)?;
    insert_track(conn, track)
}

/// Write the singleton cache state
pub(super) fn write_state(conn: &Connection, state: &CacheState) -> Result<(), CacheError> {
    conn.execute(
        r#"INSERT OR REPLACE INTO cache_state
           (id, branch, branch_commit, head_commit, keys_total, warnings, synced_at)
           VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)"#,
        params![
            state.branch,
            state.branch_commit,
            state.head_commit,
            state.keys_total as i64,
            state.warnings as i64,
            state.synced_at.to_rfc3339()
        ],
    )?;
    Ok(())
}
