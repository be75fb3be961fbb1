//! In-memory metadata store
//!
//! Models just enough of a metadata branch (linear commits, content-addressed
//! blobs, history rewrites) and a working tree (key locations) to drive the
//! builder without git.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use super::{MetadataObject, MetadataStore, ObjectChange, TrackLocation, TreeDiff};
use crate::core::git::GitError;

#[derive(Debug, Clone)]
struct Commit {
    parent: Option<String>,
    tree: BTreeMap<String, String>,
}

/// A metadata store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    commits: HashMap<String, Commit>,
    branches: HashMap<String, String>,
    blobs: HashMap<String, Vec<u8>>,
    locations: HashMap<String, TrackLocation>,
    head: Option<String>,
    counter: u64,
    bulk_reads: Cell<usize>,
    mapping_queries: Cell<usize>,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob and return its id
    pub fn put_blob(&mut self, contents: &[u8]) -> String {
        let id = sha256_hex(contents);
        self.blobs.insert(id.clone(), contents.to_vec());
        id
    }

    /// Commit a set of log changes on `branch`: `Some(contents)` writes the
    /// key's log, `None` deletes it. Returns the new tip.
    pub fn commit<'a, I>(&mut self, branch: &str, changes: I) -> String
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        let parent = self.branches.get(branch).cloned();
        let mut tree = parent
            .as_ref()
            .and_then(|p| self.commits.get(p))
            .map(|c| c.tree.clone())
            .unwrap_or_default();

        for (key, contents) in changes {
            match contents {
                Some(contents) => {
                    let blob = self.put_blob(contents.as_bytes());
                    tree.insert(key.to_string(), blob);
                }
                None => {
                    tree.remove(key);
                }
            }
        }

        self.insert_commit(branch, parent, tree)
    }

    /// Write one key's whole log
    pub fn set_log(&mut self, branch: &str, key: &str, contents: &str) -> String {
        self.commit(branch, [(key, Some(contents))])
    }

    /// Delete one key's log
    pub fn remove_log(&mut self, branch: &str, key: &str) -> String {
        self.commit(branch, [(key, None)])
    }

    /// Replace the branch history with a single new root commit holding the
    /// same tree; the old commits become unreachable.
    pub fn rewrite_history(&mut self, branch: &str) -> Option<String> {
        let tip = self.branches.get(branch)?.clone();
        let tree = self.commits.get(&tip)?.tree.clone();

        let mut cursor = Some(tip);
        while let Some(id) = cursor {
            cursor = self.commits.remove(&id).and_then(|c| c.parent);
        }

        Some(self.insert_commit(branch, None, tree))
    }

    pub fn delete_branch(&mut self, branch: &str) {
        self.branches.remove(branch);
    }

    /// Map a key to a working-tree file
    pub fn place(&mut self, key: &str, path: &str, present: bool) {
        self.locations.insert(
            key.to_string(),
            TrackLocation {
                path: path.to_string(),
                present,
            },
        );
    }

    /// Remove a key's working-tree file
    pub fn unplace(&mut self, key: &str) {
        self.locations.remove(key);
    }

    pub fn set_head(&mut self, head: Option<&str>) {
        self.head = head.map(str::to_string);
    }

    /// Number of `read_blobs` calls so far
    pub fn bulk_reads(&self) -> usize {
        self.bulk_reads.get()
    }

    /// Number of `map_keys_to_paths` calls so far
    pub fn mapping_queries(&self) -> usize {
        self.mapping_queries.get()
    }

    fn insert_commit(
        &mut self,
        branch: &str,
        parent: Option<String>,
        tree: BTreeMap<String, String>,
    ) -> String {
        self.counter += 1;
        let seed = format!(
            "{}:{}:{}:{:?}",
            self.counter,
            branch,
            parent.as_deref().unwrap_or(""),
            tree
        );
        let id = sha256_hex(seed.as_bytes())[..40].to_string();
        self.commits.insert(id.clone(), Commit { parent, tree });
        self.branches.insert(branch.to_string(), id.clone());
        id
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        let mut cursor = Some(descendant.to_string());
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.commits.get(&id).and_then(|c| c.parent.clone());
        }
        false
    }

    fn tree(&self, commit: &str) -> Result<&BTreeMap<String, String>, GitError> {
        self.commits
            .get(commit)
            .map(|c| &c.tree)
            .ok_or_else(|| GitError::CommandFailed {
                message: format!("unknown commit {}", commit),
            })
    }
}

impl MetadataStore for MemoryStore {
    fn branch_tip(&self, branch: &str) -> Result<Option<String>, GitError> {
        Ok(self.branches.get(branch).cloned())
    }

    fn head_commit(&self) -> Result<Option<String>, GitError> {
        Ok(self.head.clone())
    }

    fn list_metadata_objects(&self, commit: &str) -> Result<Vec<MetadataObject>, GitError> {
        Ok(self
            .tree(commit)?
            .iter()
            .map(|(key, blob)| MetadataObject {
                key: key.clone(),
                blob: blob.clone(),
            })
            .collect())
    }

    fn tree_diff(&self, from: &str, to: &str) -> Result<TreeDiff, GitError> {
        if !self.commits.contains_key(from) || !self.is_ancestor(from, to) {
            return Ok(TreeDiff::RewriteDetected);
        }
        let old = self.tree(from)?;
        let new = self.tree(to)?;

        let mut changes = Vec::new();
        for (key, blob) in new {
            if old.get(key) != Some(blob) {
                changes.push(ObjectChange {
                    key: key.clone(),
                    blob: Some(blob.clone()),
                });
            }
        }
        for key in old.keys().filter(|k| !new.contains_key(*k)) {
            changes.push(ObjectChange {
                key: key.clone(),
                blob: None,
            });
        }

        Ok(TreeDiff::Changes(changes))
    }

    fn read_blobs(&self, blobs: &[String]) -> Result<HashMap<String, Vec<u8>>, GitError> {
        self.bulk_reads.set(self.bulk_reads.get() + 1);
        Ok(blobs
            .iter()
            .filter_map(|id| self.blobs.get(id).map(|b| (id.clone(), b.clone())))
            .collect())
    }

    fn map_keys_to_paths(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, TrackLocation>, GitError> {
        self.mapping_queries.set(self.mapping_queries.get() + 1);
        Ok(keys
            .iter()
            .filter_map(|k| self.locations.get(k).map(|loc| (k.clone(), loc.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_list() {
        let mut store = MemoryStore::new();
        let tip = store.set_log("git-annex", "K1", "1s artist +A\n");
        let objects = store.list_metadata_objects(&tip).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "K1");
        assert_eq!(store.branch_tip("git-annex").unwrap(), Some(tip));
        assert_eq!(store.branch_tip("other").unwrap(), None);
    }

    #[test]
    fn test_tree_diff_changes_and_deletions() {
        let mut store = MemoryStore::new();
        store.set_log("b", "K1", "1s artist +A\n");
        let first = store.set_log("b", "K2", "1s artist +B\n");
        store.set_log("b", "K1", "1s artist +A2\n");
        let second = store.remove_log("b", "K2");

        let TreeDiff::Changes(mut changes) = store.tree_diff(&first, &second).unwrap() else {
            panic!("expected changes");
        };
        changes.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key, "K1");
        assert!(changes[0].blob.is_some());
        assert_eq!(changes[1], ObjectChange { key: "K2".into(), blob: None });
    }

    #[test]
    fn test_rewrite_makes_old_commits_unreachable() {
        let mut store = MemoryStore::new();
        let old = store.set_log("b", "K1", "1s artist +A\n");
        let new = store.rewrite_history("b").unwrap();
        assert_ne!(old, new);
        assert_eq!(store.tree_diff(&old, &new).unwrap(), TreeDiff::RewriteDetected);
    }

    #[test]
    fn test_counters() {
        let mut store = MemoryStore::new();
        store.place("K1", "a.mp3", true);
        store.read_blobs(&[]).unwrap();
        let mapped = store.map_keys_to_paths(&["K1".into(), "K2".into()]).unwrap();
        assert_eq!(mapped.len(), 1);
        assert_eq!(store.bulk_reads(), 1);
        assert_eq!(store.mapping_queries(), 1);
    }
}
