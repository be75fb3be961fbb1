//! git-annex backed metadata store

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use super::{
    escape_key, key_from_log_path, MetadataObject, MetadataStore, ObjectChange, TrackLocation,
    TreeDiff,
};
use crate::core::git::{Git, GitError};

/// Reads metadata from a git-annex repository through the git CLI
pub struct AnnexStore {
    git: Git,
}

impl AnnexStore {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            git: Git::new(repo_root),
        }
    }
}

impl MetadataStore for AnnexStore {
    fn branch_tip(&self, branch: &str) -> Result<Option<String>, GitError> {
        self.git.resolve_commit(&format!("refs/heads/{}", branch))
    }

    fn head_commit(&self) -> Result<Option<String>, GitError> {
        self.git.resolve_commit("HEAD")
    }

    fn list_metadata_objects(&self, commit: &str) -> Result<Vec<MetadataObject>, GitError> {
        let objects: Vec<MetadataObject> = self
            .git
            .ls_tree(commit)?
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .filter_map(|entry| {
                key_from_log_path(&entry.path).map(|key| MetadataObject {
                    key,
                    blob: entry.oid.clone(),
                })
            })
            .collect();

        debug!(commit, objects = objects.len(), "listed metadata objects");
        Ok(objects)
    }

    fn tree_diff(&self, from: &str, to: &str) -> Result<TreeDiff, GitError> {
        if !self.git.commit_exists(from)? || !self.git.is_ancestor(from, to)? {
            debug!(from, to, "previous commit is not an ancestor of the tip");
            return Ok(TreeDiff::RewriteDetected);
        }

        let changes = self
            .git
            .diff_tree(from, to)?
            .into_iter()
            .filter_map(|entry| {
                let key = key_from_log_path(&entry.path)?;
                let blob = if entry.is_deletion() {
                    None
                } else {
                    Some(entry.new_oid)
                };
                Some(ObjectChange { key, blob })
            })
            .collect();

        Ok(TreeDiff::Changes(changes))
    }

    fn read_blobs(&self, blobs: &[String]) -> Result<HashMap<String, Vec<u8>>, GitError> {
        self.git.cat_file_batch(blobs)
    }

    fn map_keys_to_paths(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, TrackLocation>, GitError> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let listing = self.git.annex_find_all(FIND_FORMAT)?;
        let objects_dir = self.git.common_dir()?.join("annex").join("objects");

        let locations = locations_from_listing(&listing, &wanted, &objects_dir);
        debug!(
            wanted = wanted.len(),
            mapped = locations.len(),
            present = locations.values().filter(|l| l.present).count(),
            "mapped keys to working-tree files"
        );
        Ok(locations)
    }
}

/// `git annex find` format: key, both object hash directories, file
const FIND_FORMAT: &str = "${key}\\t${hashdirmixed}\\t${hashdirlower}\\t${file}\\n";

/// Parse a `git annex find` listing produced with [`FIND_FORMAT`].
///
/// Presence is whether the key's object file exists in the annex object
/// store, which holds for locked and unlocked files alike. Repositories use
/// the mixed-case hash layout, bare and crippled ones the lower-case one.
fn locations_from_listing(
    listing: &str,
    wanted: &HashSet<&str>,
    objects_dir: &Path,
) -> HashMap<String, TrackLocation> {
    let mut locations: HashMap<String, TrackLocation> = HashMap::new();

    for line in listing.lines() {
        let mut parts = line.splitn(4, '\t');
        let (Some(key), Some(mixed), Some(lower), Some(file)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if !wanted.contains(key) {
            continue;
        }
        // Several files may share a key; keep the smallest path
        if let Some(existing) = locations.get(key) {
            if existing.path.as_str() <= file {
                continue;
            }
        }

        let present = match locations.get(key) {
            Some(existing) => existing.present,
            None => {
                let key_file = escape_key(key);
                [mixed, lower].iter().any(|hashdir| {
                    objects_dir
                        .join(hashdir)
                        .join(&key_file)
                        .join(&key_file)
                        .is_file()
                })
            }
        };
        locations.insert(
            key.to_string(),
            TrackLocation {
                path: file.to_string(),
                present,
            },
        );
    }

    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::{tempdir, TempDir};

    const URL_KEY: &str = "URL--http://x.com/a.mp3";
    const URL_LOG: &str = "f00/ba4/URL--http&c%%x.com%a.mp3.log.met";

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn commit_all(dir: &Path, message: &str) -> String {
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", message]);
        git(dir, &["rev-parse", "HEAD"])
    }

    /// Repository with a hand-written metadata branch checked out
    fn annex_branch_repo() -> (TempDir, AnnexStore, String) {
        let tmp = tempdir().unwrap();
        let dir = tmp.path();
        git(dir, &["init", "-q"]);
        git(dir, &["config", "user.email", "test@example.com"]);
        git(dir, &["config", "user.name", "Test User"]);
        git(dir, &["checkout", "-q", "-b", "git-annex"]);

        write(dir, "uuid.log", "1234 here\n");
        write(dir, "abc/def/SHA256E-s1--aa.flac.log", "1s 1 1234\n");
        write(dir, "abc/def/SHA256E-s1--aa.flac.log.met", "1s rating +5\n");
        write(dir, URL_LOG, "1s genre +techno\n");
        let commit = commit_all(dir, "initial");

        let store = AnnexStore::new(dir);
        (tmp, store, commit)
    }

    #[test]
    fn test_branch_tip() {
        let (_tmp, store, commit) = annex_branch_repo();
        assert_eq!(store.branch_tip("git-annex").unwrap(), Some(commit));
        assert_eq!(store.branch_tip("no-such-branch").unwrap(), None);
    }

    #[test]
    fn test_list_metadata_objects_skips_other_logs() {
        let (tmp, store, commit) = annex_branch_repo();
        let mut objects = store.list_metadata_objects(&commit).unwrap();
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        let keys: Vec<&str> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["SHA256E-s1--aa.flac", URL_KEY]);

        let url_blob = git(tmp.path(), &["rev-parse", &format!("{}:{}", commit, URL_LOG)]);
        assert_eq!(objects[1].blob, url_blob);
    }

    #[test]
    fn test_tree_diff_reports_changes_and_deletions() {
        let (tmp, store, first) = annex_branch_repo();
        let dir = tmp.path();

        write(dir, "abc/def/SHA256E-s1--aa.flac.log.met", "1s rating +5\n2s rating -5 rating +2\n");
        write(dir, "uuid.log", "1234 here\n5678 there\n");
        fs::remove_file(dir.join(URL_LOG)).unwrap();
        let second = commit_all(dir, "update");

        let TreeDiff::Changes(mut changes) = store.tree_diff(&first, &second).unwrap() else {
            panic!("expected changes");
        };
        changes.sort_by(|a, b| a.key.cmp(&b.key));

        let modified = git(
            dir,
            &["rev-parse", &format!("{}:abc/def/SHA256E-s1--aa.flac.log.met", second)],
        );
        assert_eq!(
            changes,
            vec![
                ObjectChange {
                    key: "SHA256E-s1--aa.flac".to_string(),
                    blob: Some(modified),
                },
                ObjectChange {
                    key: URL_KEY.to_string(),
                    blob: None,
                },
            ]
        );
    }

    #[test]
    fn test_tree_diff_detects_rewritten_history() {
        let (tmp, store, _first) = annex_branch_repo();
        let dir = tmp.path();

        write(dir, "abc/def/SHA256E-s1--aa.flac.log.met", "1s rating +4\n");
        let second = commit_all(dir, "update");
        git(dir, &["commit", "-q", "--amend", "-m", "rewritten"]);
        let amended = git(dir, &["rev-parse", "HEAD"]);

        assert_eq!(
            store.tree_diff(&second, &amended).unwrap(),
            TreeDiff::RewriteDetected
        );
        assert_eq!(
            store
                .tree_diff("0123456789abcdef0123456789abcdef01234567", &amended)
                .unwrap(),
            TreeDiff::RewriteDetected
        );
    }

    fn wanted<'a>(keys: &[&'a str]) -> HashSet<&'a str> {
        keys.iter().copied().collect()
    }

    fn place_object(objects: &Path, hashdir: &str, key: &str) {
        let name = escape_key(key);
        write(objects, &format!("{}{}/{}", hashdir, name, name), "audio");
    }

    #[test]
    fn test_presence_follows_object_store() {
        let tmp = tempdir().unwrap();
        let objects = tmp.path().join("objects");
        place_object(&objects, "Xk/9M/", "K1");
        place_object(&objects, "1a2/3b4/", "K3");

        let listing = "K1\tXk/9M/\t1a2/3b4/\tmusic/locked.flac\n\
                       K2\tQq/7Z/\t5c6/7d8/\tmusic/unlocked.flac\n\
                       K3\tPp/2W/\t1a2/3b4/\tmusic/bare.flac\n";
        let locations = locations_from_listing(listing, &wanted(&["K1", "K2", "K3"]), &objects);

        assert!(locations["K1"].present);
        // Unlocked pointer file without content in the store
        assert!(!locations["K2"].present);
        assert!(locations["K3"].present);
        assert_eq!(locations["K2"].path, "music/unlocked.flac");
    }

    #[test]
    fn test_presence_uses_escaped_key_name() {
        let tmp = tempdir().unwrap();
        let objects = tmp.path().join("objects");
        place_object(&objects, "Ab/Cd/", URL_KEY);

        let listing = format!("{}\tAb/Cd/\tab1/cd2/\tweb/a.mp3\n", URL_KEY);
        let locations = locations_from_listing(&listing, &wanted(&[URL_KEY]), &objects);

        assert!(locations[URL_KEY].present);
    }

    #[test]
    fn test_smallest_path_wins_and_unwanted_keys_skipped() {
        let tmp = tempdir().unwrap();
        let objects = tmp.path().join("objects");

        let listing = "K1\tXk/9M/\t1a2/3b4/\tz/copy.flac\n\
                       K1\tXk/9M/\t1a2/3b4/\ta/orig.flac\n\
                       K1\tXk/9M/\t1a2/3b4/\tm/other.flac\n\
                       K9\tXk/9M/\t1a2/3b4/\tb/skip.flac\n\
                       malformed line\n";
        let locations = locations_from_listing(listing, &wanted(&["K1"]), &objects);

        assert_eq!(locations.len(), 1);
        assert_eq!(
            locations["K1"],
            TrackLocation {
                path: "a/orig.flac".to_string(),
                present: false,
            }
        );
    }

    #[test]
    fn test_file_names_may_contain_tabs() {
        let tmp = tempdir().unwrap();
        let listing = "K1\tXk/9M/\t1a2/3b4/\tweird\tname.flac\n";
        let locations =
            locations_from_listing(listing, &wanted(&["K1"]), &tmp.path().join("objects"));
        assert_eq!(locations["K1"].path, "weird\tname.flac");
    }
}
