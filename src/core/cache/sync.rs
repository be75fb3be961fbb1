//! Index synchronization with the metadata branch
//!
//! Full builds rewrite every row from the branch tip. Refreshes diff the
//! recorded commit against the tip, re-decode only the changed logs and
//! re-map every known key so moved, fetched or dropped files are picked up.
//!
//! All reads from the store happen before the write transaction opens, so
//! readers of the database never wait on git.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, TransactionBehavior};
use tracing::{debug, info, warn};

use super::schema::{delete_track, insert_track, replace_track, write_state};
use super::{BuildMode, BuildStats, CacheError, CacheState, CachedTrack, TrackCache};
use crate::core::branch::{BranchDelta, BranchReader};
use crate::core::field::{Field, FieldKind};
use crate::core::lock::IndexLock;
use crate::core::metalog::ResolvedMetadata;
use crate::core::store::{MetadataObject, MetadataStore, TrackLocation};

impl TrackCache {
    /// Build or refresh the index, waiting for any other writer to finish
    pub fn build<S: MetadataStore + ?Sized>(
        &mut self,
        store: &S,
        branch: &str,
        full: bool,
    ) -> Result<BuildStats, CacheError> {
        let lock_path = self.lock_path();
        let _lock = IndexLock::lock_exclusive(&lock_path).map_err(|source| CacheError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        self.build_locked(store, branch, full)
    }

    /// Like [`TrackCache::build`], but returns `None` right away when
    /// another writer holds the lock
    pub fn try_build<S: MetadataStore + ?Sized>(
        &mut self,
        store: &S,
        branch: &str,
        full: bool,
    ) -> Result<Option<BuildStats>, CacheError> {
        let lock_path = self.lock_path();
        let lock = IndexLock::try_lock_exclusive(&lock_path).map_err(|source| CacheError::Lock {
            path: lock_path.clone(),
            source,
        })?;
        let Some(_lock) = lock else {
            debug!(lock = %lock_path.display(), "index is being built elsewhere; skipping");
            return Ok(None);
        };
        self.build_locked(store, branch, full).map(Some)
    }

    fn build_locked<S: MetadataStore + ?Sized>(
        &mut self,
        store: &S,
        branch: &str,
        full: bool,
    ) -> Result<BuildStats, CacheError> {
        let start = Instant::now();
        let reader = BranchReader::new(store, branch);

        let mut stats = if full {
            self.full_build(&reader, BuildMode::Full)?
        } else {
            self.refresh(&reader)?
        };
        stats.duration_ms = start.elapsed().as_millis() as u64;

        if stats.warnings > 0 {
            warn!(
                warnings = stats.warnings,
                "skipped malformed metadata entries while building the index"
            );
        }
        info!(
            mode = %stats.mode,
            keys_total = stats.keys_total,
            keys_updated = stats.keys_updated,
            keys_removed = stats.keys_removed,
            duration_ms = stats.duration_ms,
            "index build finished"
        );

        Ok(stats)
    }

    /// Rewrite every row from the current branch tip
    fn full_build<S: MetadataStore + ?Sized>(
        &mut self,
        reader: &BranchReader<'_, S>,
        mode: BuildMode,
    ) -> Result<BuildStats, CacheError> {
        let mut stats = BuildStats::new(mode);
        let head = reader.head()?;

        let (tip, objects) = match reader.snapshot()? {
            Some(snapshot) => (Some(snapshot.tip), snapshot.objects),
            None => (None, Vec::new()),
        };

        let keys: Vec<String> = objects.iter().map(|o| o.key.clone()).collect();
        let locations = reader.locate(&keys)?;

        // Unmapped keys are never decoded; they stay in meta_objects only
        let mapped: Vec<MetadataObject> = objects
            .iter()
            .filter(|o| locations.contains_key(&o.key))
            .cloned()
            .collect();
        debug!(
            objects = objects.len(),
            mapped = mapped.len(),
            "full build plan"
        );

        let resolved = reader.read_metadata(&mapped, &mut stats.warnings)?;
        let mut tracks = Vec::with_capacity(resolved.len());
        for object in &mapped {
            if let (Some(location), Some(metadata)) =
                (locations.get(&object.key), resolved.get(&object.key))
            {
                tracks.push(project_track(
                    &object.key,
                    location,
                    metadata,
                    &mut stats.warnings,
                ));
            }
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            r#"
            DELETE FROM track_values;
            DELETE FROM tracks;
            DELETE FROM meta_objects;
            "#,
        )?;
        {
            let mut stmt = tx.prepare("INSERT INTO meta_objects (key, blob) VALUES (?1, ?2)")?;
            for object in &objects {
                stmt.execute(params![object.key, object.blob])?;
            }
        }
        for track in &tracks {
            insert_track(&tx, track)?;
        }
        tx.execute("INSERT INTO tracks_fts(tracks_fts) VALUES ('rebuild')", [])?;

        stats.keys_total = tracks.len();
        stats.keys_updated = tracks.len();
        write_state(
            &tx,
            &CacheState {
                branch: reader.branch().to_string(),
                branch_commit: tip,
                head_commit: head,
                keys_total: stats.keys_total,
                warnings: stats.warnings,
                synced_at: Utc::now(),
            },
        )?;
        tx.commit()?;

        Ok(stats)
    }

    /// Bring the index up to date with as little work as possible
    fn refresh<S: MetadataStore + ?Sized>(
        &mut self,
        reader: &BranchReader<'_, S>,
    ) -> Result<BuildStats, CacheError> {
        let Some(state) = self.state()? else {
            debug!("no previous build; running a full build");
            return self.full_build(reader, BuildMode::Full);
        };
        if state.branch != reader.branch() {
            debug!(
                previous = %state.branch,
                current = %reader.branch(),
                "metadata branch changed; running a full build"
            );
            return self.full_build(reader, BuildMode::Full);
        }
        let Some(since) = state.branch_commit.clone() else {
            return self.full_build(reader, BuildMode::Full);
        };

        let head = reader.head()?;
        let (tip, changes) = match reader.changes_since(&since)? {
            BranchDelta::Missing => return self.full_build(reader, BuildMode::Full),
            BranchDelta::RewriteRequired { .. } => {
                return self.full_build(reader, BuildMode::FullAfterRewrite)
            }
            BranchDelta::Unchanged { .. } if head == state.head_commit => {
                let mut stats = BuildStats::new(BuildMode::UpToDate);
                stats.keys_total = self.track_count()?;
                return Ok(stats);
            }
            BranchDelta::Unchanged { tip } => (tip, Vec::new()),
            BranchDelta::Changed { tip, changes } => (tip, changes),
        };

        let mut stats = BuildStats::new(BuildMode::Incremental);

        // Apply the diff to the recorded branch listing
        let mut objects = self.meta_objects()?;
        let mut changed: HashSet<String> = HashSet::with_capacity(changes.len());
        for change in &changes {
            match &change.blob {
                Some(blob) => {
                    objects.insert(change.key.clone(), blob.clone());
                }
                None => {
                    objects.remove(&change.key);
                }
            }
            changed.insert(change.key.clone());
        }

        let indexed = self.indexed_locations()?;
        let keys: Vec<String> = objects.keys().cloned().collect();
        let locations = reader.locate(&keys)?;

        let mut to_decode = Vec::new();
        let mut relocated = Vec::new();
        let mut removed = BTreeSet::new();
        for (key, blob) in &objects {
            match (locations.get(key), indexed.get(key)) {
                (Some(location), Some(previous)) => {
                    if changed.contains(key) {
                        to_decode.push(MetadataObject {
                            key: key.clone(),
                            blob: blob.clone(),
                        });
                    } else if location != previous {
                        relocated.push((key.clone(), location.clone()));
                    }
                }
                (Some(_), None) => to_decode.push(MetadataObject {
                    key: key.clone(),
                    blob: blob.clone(),
                }),
                (None, Some(_)) => {
                    removed.insert(key.clone());
                }
                (None, None) => {}
            }
        }
        for key in indexed.keys() {
            if !objects.contains_key(key) {
                removed.insert(key.clone());
            }
        }

        let resolved = reader.read_metadata(&to_decode, &mut stats.warnings)?;
        let mut tracks = Vec::with_capacity(resolved.len());
        for object in &to_decode {
            match (locations.get(&object.key), resolved.get(&object.key)) {
                (Some(location), Some(metadata)) => tracks.push(project_track(
                    &object.key,
                    location,
                    metadata,
                    &mut stats.warnings,
                )),
                // Unreadable log: a full build would not index it either
                _ => {
                    if indexed.contains_key(&object.key) {
                        removed.insert(object.key.clone());
                    }
                }
            }
        }
        debug!(
            changed = changes.len(),
            decoded = tracks.len(),
            relocated = relocated.len(),
            removed = removed.len(),
            "incremental refresh plan"
        );

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut upsert =
                tx.prepare("INSERT OR REPLACE INTO meta_objects (key, blob) VALUES (?1, ?2)")?;
            let mut delete = tx.prepare("DELETE FROM meta_objects WHERE key = ?1")?;
            for change in &changes {
                match &change.blob {
                    Some(blob) => upsert.execute(params![change.key, blob])?,
                    None => delete.execute(params![change.key])?,
                };
            }
        }
        for key in &removed {
            delete_track(&tx, key)?;
        }
        for track in &tracks {
            replace_track(&tx, track)?;
        }
        {
            let mut stmt = tx.prepare("UPDATE tracks SET path = ?2, present = ?3 WHERE key = ?1")?;
            for (key, location) in &relocated {
                stmt.execute(params![key, location.path, location.present])?;
            }
        }

        let keys_total: i64 = tx.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        stats.keys_total = keys_total as usize;
        stats.keys_updated = tracks.len() + relocated.len();
        stats.keys_removed = removed.len();
        write_state(
            &tx,
            &CacheState {
                branch: reader.branch().to_string(),
                branch_commit: Some(tip),
                head_commit: head,
                keys_total: stats.keys_total,
                warnings: stats.warnings,
                synced_at: Utc::now(),
            },
        )?;
        tx.commit()?;

        Ok(stats)
    }

    /// The branch listing recorded by the last build
    fn meta_objects(&self) -> Result<BTreeMap<String, String>, CacheError> {
        let mut stmt = self.conn.prepare("SELECT key, blob FROM meta_objects")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<BTreeMap<_, _>, _>>()?)
    }

    /// Where each indexed track was last seen
    fn indexed_locations(&self) -> Result<HashMap<String, TrackLocation>, CacheError> {
        let mut stmt = self.conn.prepare("SELECT key, path, present FROM tracks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                TrackLocation {
                    path: row.get(1)?,
                    present: row.get(2)?,
                },
            ))
        })?;
        Ok(rows.collect::<Result<HashMap<_, _>, _>>()?)
    }
}

/// Project resolved metadata onto the typed columns of a track.
///
/// Unknown fields are ignored, aliases fold into their canonical field, and
/// numeric values that don't parse count as decode warnings.
pub(crate) fn project_track(
    key: &str,
    location: &TrackLocation,
    metadata: &ResolvedMetadata,
    warnings: &mut usize,
) -> CachedTrack {
    let mut track = CachedTrack::new(key, &location.path, location.present);

    let mut folded: BTreeMap<Field, BTreeSet<&str>> = BTreeMap::new();
    for (name, values) in metadata.iter() {
        if let Some(field) = Field::from_metadata_name(name) {
            folded
                .entry(field)
                .or_default()
                .extend(values.iter().map(String::as_str));
        }
    }

    for (field, values) in folded {
        match field.kind() {
            FieldKind::Text => {
                if let Some(slot) = track.text_slot(field) {
                    *slot = Some(values.into_iter().collect::<Vec<_>>().join("; "));
                }
            }
            FieldKind::Numeric => {
                let mut smallest: Option<f64> = None;
                for value in values {
                    match value.trim().parse::<f64>() {
                        Ok(n) if n.is_finite() => {
                            smallest = Some(smallest.map_or(n, |s| s.min(n)));
                        }
                        _ => {
                            debug!(key, field = %field, value, "non-numeric value");
                            *warnings += 1;
                        }
                    }
                }
                if let Some(slot) = track.numeric_slot(field) {
                    *slot = smallest;
                }
            }
            FieldKind::Multi => {
                if let Some(slot) = track.multi_slot(field) {
                    *slot = values.into_iter().map(str::to_string).collect();
                }
            }
        }
    }

    track
}
