//! Metadata branch reader
//!
//! Turns the store's plumbing into what the cache builder needs: either a
//! full listing of metadata objects or the set of objects changed since a
//! previously synchronized commit, plus bulk decoding and key mapping.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::git::GitError;
use crate::core::metalog::{self, ResolvedMetadata};
use crate::core::store::{MetadataObject, MetadataStore, ObjectChange, TrackLocation, TreeDiff};

/// Every metadata object at a branch tip
#[derive(Debug, Clone)]
pub struct BranchSnapshot {
    pub tip: String,
    pub objects: Vec<MetadataObject>,
}

/// What changed on the branch since a recorded commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchDelta {
    /// The branch does not exist
    Missing,
    /// The tip is still the recorded commit
    Unchanged { tip: String },
    /// The tip moved forward
    Changed {
        tip: String,
        changes: Vec<ObjectChange>,
    },
    /// The recorded commit is unreachable; only a full rebuild is safe
    RewriteRequired { tip: String },
}

/// Reads one metadata branch from a store
pub struct BranchReader<'s, S: MetadataStore + ?Sized> {
    store: &'s S,
    branch: String,
}

impl<'s, S: MetadataStore + ?Sized> BranchReader<'s, S> {
    pub fn new(store: &'s S, branch: &str) -> Self {
        Self {
            store,
            branch: branch.to_string(),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Current tip of the branch
    pub fn tip(&self) -> Result<Option<String>, GitError> {
        self.store.branch_tip(&self.branch)
    }

    /// Commit checked out in the working tree
    pub fn head(&self) -> Result<Option<String>, GitError> {
        self.store.head_commit()
    }

    /// All metadata objects, `None` if the branch does not exist
    pub fn snapshot(&self) -> Result<Option<BranchSnapshot>, GitError> {
        let Some(tip) = self.tip()? else {
            debug!(branch = %self.branch, "metadata branch does not exist");
            return Ok(None);
        };
        let objects = self.store.list_metadata_objects(&tip)?;
        Ok(Some(BranchSnapshot { tip, objects }))
    }

    /// Objects changed since `since`
    pub fn changes_since(&self, since: &str) -> Result<BranchDelta, GitError> {
        let Some(tip) = self.tip()? else {
            return Ok(BranchDelta::Missing);
        };
        if tip == since {
            return Ok(BranchDelta::Unchanged { tip });
        }

        match self.store.tree_diff(since, &tip)? {
            TreeDiff::Changes(changes) => {
                debug!(
                    branch = %self.branch,
                    changed = changes.len(),
                    "metadata branch advanced"
                );
                Ok(BranchDelta::Changed { tip, changes })
            }
            TreeDiff::RewriteDetected => {
                warn!(
                    branch = %self.branch,
                    since,
                    "metadata branch history was rewritten; full rebuild required"
                );
                Ok(BranchDelta::RewriteRequired { tip })
            }
        }
    }

    /// Read and resolve many objects with a single bulk read. Objects whose
    /// contents could not be read count as decode warnings.
    pub fn read_metadata(
        &self,
        objects: &[MetadataObject],
        warnings: &mut usize,
    ) -> Result<HashMap<String, ResolvedMetadata>, GitError> {
        let mut resolved = HashMap::with_capacity(objects.len());
        if objects.is_empty() {
            return Ok(resolved);
        }

        let mut blob_ids: Vec<String> = objects.iter().map(|o| o.blob.clone()).collect();
        blob_ids.sort();
        blob_ids.dedup();
        let contents = self.store.read_blobs(&blob_ids)?;

        for object in objects {
            match contents.get(&object.blob) {
                Some(raw) => {
                    let record = metalog::decode(&object.key, raw, warnings);
                    resolved.insert(object.key.clone(), record.resolve());
                }
                None => {
                    debug!(key = %object.key, blob = %object.blob, "metadata blob missing");
                    *warnings += 1;
                }
            }
        }

        Ok(resolved)
    }

    /// Map keys to working-tree files with one bulk query
    pub fn locate(&self, keys: &[String]) -> Result<HashMap<String, TrackLocation>, GitError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.store.map_keys_to_paths(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    const BRANCH: &str = "git-annex";

    #[test]
    fn test_missing_branch_is_empty_not_error() {
        let store = MemoryStore::new();
        let reader = BranchReader::new(&store, BRANCH);
        assert!(reader.snapshot().unwrap().is_none());
        assert_eq!(reader.changes_since("abc").unwrap(), BranchDelta::Missing);
    }

    #[test]
    fn test_snapshot_and_bulk_read() {
        let mut store = MemoryStore::new();
        store.set_log(BRANCH, "K1", "1s artist +A\n");
        store.set_log(BRANCH, "K2", "1s artist +B\n");
        store.set_log(BRANCH, "K3", "1s artist +A\n");

        let reader = BranchReader::new(&store, BRANCH);
        let snapshot = reader.snapshot().unwrap().unwrap();
        assert_eq!(snapshot.objects.len(), 3);

        let mut warnings = 0;
        let resolved = reader.read_metadata(&snapshot.objects, &mut warnings).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(warnings, 0);
        assert_eq!(store.bulk_reads(), 1);
        assert!(resolved["K2"].get("artist").unwrap().contains("B"));
    }

    #[test]
    fn test_changes_since() {
        let mut store = MemoryStore::new();
        let first = store.set_log(BRANCH, "K1", "1s artist +A\n");
        let reader_tip = {
            let reader = BranchReader::new(&store, BRANCH);
            assert_eq!(
                reader.changes_since(&first).unwrap(),
                BranchDelta::Unchanged { tip: first.clone() }
            );
            first.clone()
        };

        let second = store.set_log(BRANCH, "K2", "1s artist +B\n");
        let reader = BranchReader::new(&store, BRANCH);
        match reader.changes_since(&reader_tip).unwrap() {
            BranchDelta::Changed { tip, changes } => {
                assert_eq!(tip, second);
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].key, "K2");
            }
            other => panic!("unexpected delta {:?}", other),
        }
    }

    #[test]
    fn test_rewrite_requires_full_rebuild() {
        let mut store = MemoryStore::new();
        let old = store.set_log(BRANCH, "K1", "1s artist +A\n");
        let new = store.rewrite_history(BRANCH).unwrap();
        let reader = BranchReader::new(&store, BRANCH);
        assert_eq!(
            reader.changes_since(&old).unwrap(),
            BranchDelta::RewriteRequired { tip: new }
        );
    }

    #[test]
    fn test_missing_blob_counts_warning() {
        let store = MemoryStore::new();
        let reader = BranchReader::new(&store, BRANCH);
        let mut warnings = 0;
        let objects = vec![MetadataObject {
            key: "K1".into(),
            blob: "deadbeef".into(),
        }];
        let resolved = reader.read_metadata(&objects, &mut warnings).unwrap();
        assert!(resolved.is_empty());
        assert_eq!(warnings, 1);
    }
}
