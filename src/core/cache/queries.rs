//! Track lookups and filtered selects

use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{CacheError, CachedTrack, TrackCache};

/// Separator used when multi-valued fields are concatenated in SQL
const VALUE_SEPARATOR: char = '\u{1f}';

/// Columns selected for a full track row, `tracks` aliased as `t`
pub(crate) const TRACK_COLUMNS: &str = "t.key, t.path, t.present, \
     t.artist, t.title, t.album, t.genre, t.label, t.comment, \
     t.year, t.bpm, t.rating, \
     (SELECT group_concat(v.value, char(31)) FROM track_values v \
        WHERE v.key = t.key AND v.field = 'crate'), \
     (SELECT group_concat(v.value, char(31)) FROM track_values v \
        WHERE v.key = t.key AND v.field = 'tag')";

/// Register `casefold(text)`, a Unicode-aware `lower()`
pub(super) fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

fn split_values(joined: Option<String>) -> Vec<String> {
    let mut values: Vec<String> = joined
        .map(|s| s.split(VALUE_SEPARATOR).map(str::to_string).collect())
        .unwrap_or_default();
    values.sort();
    values
}

/// Build a track from a row selected with [`TRACK_COLUMNS`]
pub(crate) fn row_to_track(row: &Row<'_>) -> rusqlite::Result<CachedTrack> {
    Ok(CachedTrack {
        key: row.get(0)?,
        path: row.get(1)?,
        present: row.get(2)?,
        artist: row.get(3)?,
        title: row.get(4)?,
        album: row.get(5)?,
        genre: row.get(6)?,
        label: row.get(7)?,
        comment: row.get(8)?,
        year: row.get(9)?,
        bpm: row.get(10)?,
        rating: row.get(11)?,
        crates: split_values(row.get(12)?),
        tags: split_values(row.get(13)?),
    })
}

impl TrackCache {
    /// Get a single track by key
    pub fn get_track(&self, key: &str) -> Result<Option<CachedTrack>, CacheError> {
        let sql = format!("SELECT {} FROM tracks t WHERE t.key = ?1", TRACK_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![key], row_to_track)
            .optional()?)
    }

    /// Every indexed track, ordered by key
    pub fn all_tracks(&self) -> Result<Vec<CachedTrack>, CacheError> {
        let sql = format!("SELECT {} FROM tracks t ORDER BY t.key", TRACK_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_track)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Stream the tracks matching a SQL condition over `t`, ordered by path.
    ///
    /// Runs exactly one statement and returns the number of rows visited.
    pub(crate) fn select_tracks<F>(
        &self,
        condition: &str,
        values: &[Value],
        limit: Option<usize>,
        mut visit: F,
    ) -> Result<usize, CacheError>
    where
        F: FnMut(CachedTrack),
    {
        let mut sql = format!(
            "SELECT {} FROM tracks t WHERE {} ORDER BY t.path, t.key",
            TRACK_COLUMNS, condition
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        let mut visited = 0;
        while let Some(row) = rows.next()? {
            visit(row_to_track(row)?);
            visited += 1;
        }
        Ok(visited)
    }

    /// Count the tracks matching a SQL condition over `t`
    pub(crate) fn count_tracks(&self, condition: &str, values: &[Value]) -> Result<usize, CacheError> {
        let sql = format!("SELECT COUNT(*) FROM tracks t WHERE {}", condition);
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }
}
