//! Git command abstraction layer
//!
//! Provides a safe interface for the read-only git plumbing the index needs,
//! without exposing shell commands directly. All user input is passed via
//! std::process::Command args.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

/// Git operations abstraction
pub struct Git {
    repo_root: PathBuf,
}

/// Result of a git command execution
#[derive(Debug)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub code: Option<i32>,
}

impl GitOutput {
    /// Stdout decoded lossily with surrounding whitespace removed
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// Errors that can occur during git operations
#[derive(Debug, Error, Diagnostic)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    #[diagnostic(code(crate_index::git::not_a_repo))]
    NotARepo(PathBuf),

    #[error("Git command failed: {message}")]
    #[diagnostic(code(crate_index::git::command_failed))]
    CommandFailed { message: String },

    #[error("Unexpected output from `{command}`: {detail}")]
    #[diagnostic(code(crate_index::git::bad_output))]
    BadOutput { command: String, detail: String },

    #[error("Git not installed or not in PATH")]
    #[diagnostic(
        code(crate_index::git::not_found),
        help("install git and git-annex, then retry")
    )]
    GitNotFound,

    #[error("IO error: {0}")]
    #[diagnostic(code(crate_index::git::io))]
    IoError(#[from] std::io::Error),
}

/// One entry of `git ls-tree -r`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub kind: String,
    pub oid: String,
    pub path: String,
}

/// One entry of `git diff-tree -r`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub new_oid: String,
    pub status: char,
    pub path: String,
}

impl DiffEntry {
    /// Whether the path no longer exists on the new side
    pub fn is_deletion(&self) -> bool {
        self.status == 'D' || is_null_oid(&self.new_oid)
    }
}

fn is_null_oid(oid: &str) -> bool {
    !oid.is_empty() && oid.bytes().all(|b| b == b'0')
}

impl Git {
    /// Create a new Git instance for the repository at the given path
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    /// Root directory commands run in
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!("{}", Self::format_command(args));
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.repo_root);
        cmd
    }

    fn map_spawn_error(e: std::io::Error) -> GitError {
        if e.kind() == std::io::ErrorKind::NotFound {
            GitError::GitNotFound
        } else {
            GitError::IoError(e)
        }
    }

    /// Execute a git command and return the output
    fn run(&self, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = self
            .command(args)
            .output()
            .map_err(Self::map_spawn_error)?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            code: output.status.code(),
        })
    }

    /// Execute a git command, failing on a non-zero exit
    fn run_checked(&self, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = self.run(args)?;
        if output.success {
            Ok(output)
        } else {
            Err(GitError::CommandFailed {
                message: format!("{}: {}", Self::format_command(args), output.stderr),
            })
        }
    }

    /// Resolve a revision to a commit id, `None` if it does not exist
    pub fn resolve_commit(&self, rev: &str) -> Result<Option<String>, GitError> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        if output.success {
            Ok(Some(output.stdout_str()))
        } else if output.code == Some(1) || output.code == Some(128) {
            Ok(None)
        } else {
            Err(GitError::CommandFailed {
                message: output.stderr,
            })
        }
    }

    /// Check whether a commit object is present in the object database
    pub fn commit_exists(&self, commit: &str) -> Result<bool, GitError> {
        let spec = format!("{}^{{commit}}", commit);
        Ok(self.run(&["cat-file", "-e", &spec])?.success)
    }

    /// Check whether `ancestor` is reachable from `descendant`
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        let output = self.run(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GitError::CommandFailed {
                message: output.stderr,
            }),
        }
    }

    /// List every blob in a commit's tree
    pub fn ls_tree(&self, commit: &str) -> Result<Vec<TreeEntry>, GitError> {
        let output = self.run_checked(&["ls-tree", "-r", "-z", "--full-tree", commit])?;
        let mut entries = Vec::new();

        for record in output.stdout.split(|b| *b == 0).filter(|r| !r.is_empty()) {
            let record = String::from_utf8_lossy(record);
            let (meta, path) = record.split_once('\t').ok_or_else(|| GitError::BadOutput {
                command: "git ls-tree".to_string(),
                detail: record.to_string(),
            })?;
            let mut parts = meta.split(' ');
            let (Some(_mode), Some(kind), Some(oid)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(GitError::BadOutput {
                    command: "git ls-tree".to_string(),
                    detail: record.to_string(),
                });
            };
            entries.push(TreeEntry {
                kind: kind.to_string(),
                oid: oid.to_string(),
                path: path.to_string(),
            });
        }

        Ok(entries)
    }

    /// Blob-level changes between two commits (renames reported as delete + add)
    pub fn diff_tree(&self, from: &str, to: &str) -> Result<Vec<DiffEntry>, GitError> {
        let output = self.run_checked(&["diff-tree", "-r", "-z", "--no-renames", from, to])?;
        let mut entries = Vec::new();

        // -z output alternates ":<modes> <oids> <status>" and "<path>" records
        let mut fields = output.stdout.split(|b| *b == 0).filter(|r| !r.is_empty());
        while let Some(meta) = fields.next() {
            let meta = String::from_utf8_lossy(meta);
            let path = fields.next().ok_or_else(|| GitError::BadOutput {
                command: "git diff-tree".to_string(),
                detail: format!("missing path after '{}'", meta),
            })?;
            let parts: Vec<&str> = meta.trim_start_matches(':').split(' ').collect();
            if parts.len() < 5 {
                return Err(GitError::BadOutput {
                    command: "git diff-tree".to_string(),
                    detail: meta.to_string(),
                });
            }
            entries.push(DiffEntry {
                new_oid: parts[3].to_string(),
                status: parts[4].chars().next().unwrap_or('M'),
                path: String::from_utf8_lossy(path).to_string(),
            });
        }

        Ok(entries)
    }

    /// Read many blobs through a single `git cat-file --batch` process
    pub fn cat_file_batch(&self, oids: &[String]) -> Result<HashMap<String, Vec<u8>>, GitError> {
        let mut contents = HashMap::with_capacity(oids.len());
        if oids.is_empty() {
            return Ok(contents);
        }

        let mut child = self
            .command(&["cat-file", "--batch"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Self::map_spawn_error)?;

        let mut stdin = child.stdin.take().ok_or_else(|| GitError::BadOutput {
            command: "git cat-file --batch".to_string(),
            detail: "stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| GitError::BadOutput {
            command: "git cat-file --batch".to_string(),
            detail: "stdout unavailable".to_string(),
        })?;

        let read_result = std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> std::io::Result<()> {
                for oid in oids {
                    stdin.write_all(oid.as_bytes())?;
                    stdin.write_all(b"\n")?;
                }
                Ok(())
            });

            let result = read_batch_output(BufReader::new(stdout), oids.len(), &mut contents);
            if result.is_err() {
                // Unblock the writer if the reader gave up early
                let _ = child.kill();
            }
            let written = writer.join().unwrap_or_else(|_| {
                Err(std::io::Error::other("cat-file writer thread panicked"))
            });
            result.and_then(|()| written.map_err(GitError::IoError))
        });

        let status = child.wait()?;
        read_result?;
        if !status.success() {
            return Err(GitError::CommandFailed {
                message: format!("git cat-file --batch exited with {}", status),
            });
        }

        Ok(contents)
    }

    /// Directory shared by all worktrees, where `annex/objects` lives
    pub fn common_dir(&self) -> Result<PathBuf, GitError> {
        let output = self.run_checked(&["rev-parse", "--git-common-dir"])?;
        let dir = PathBuf::from(output.stdout_str());
        Ok(if dir.is_absolute() {
            dir
        } else {
            self.repo_root.join(dir)
        })
    }

    /// Run `git annex find` with a custom format over all annexed files,
    /// whether or not their content is present
    pub fn annex_find_all(&self, format: &str) -> Result<String, GitError> {
        let format_arg = format!("--format={}", format);
        let output = self.run_checked(&["annex", "find", "--include=*", &format_arg])?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Format a command for logs and error messages
    pub fn format_command(args: &[&str]) -> String {
        format!("git {}", args.join(" "))
    }
}

fn read_batch_output<R: BufRead>(
    mut reader: R,
    expected: usize,
    contents: &mut HashMap<String, Vec<u8>>,
) -> Result<(), GitError> {
    let bad = |detail: String| GitError::BadOutput {
        command: "git cat-file --batch".to_string(),
        detail,
    };

    for _ in 0..expected {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Err(bad("unexpected end of output".to_string()));
        }
        let header = header.trim_end();
        let parts: Vec<&str> = header.split(' ').collect();

        // "<oid> missing" for objects that do not exist
        if parts.len() == 2 && parts[1] == "missing" {
            debug!("blob {} missing", parts[0]);
            continue;
        }
        if parts.len() != 3 {
            return Err(bad(header.to_string()));
        }

        let size: usize = parts[2]
            .parse()
            .map_err(|_| bad(format!("bad size in '{}'", header)))?;
        let mut body = vec![0u8; size];
        reader.read_exact(&mut body)?;
        let mut newline = [0u8; 1];
        reader.read_exact(&mut newline)?;

        contents.insert(parts[0].to_string(), body);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&out.stderr));
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    fn init_test_repo() -> (tempfile::TempDir, Git) {
        let tmp = tempdir().unwrap();
        git(tmp.path(), &["init", "-q"]);
        git(tmp.path(), &["config", "user.email", "test@example.com"]);
        git(tmp.path(), &["config", "user.name", "Test User"]);
        git(tmp.path(), &["checkout", "-q", "-b", "meta"]);

        let g = Git::new(tmp.path());
        (tmp, g)
    }

    fn commit_file(dir: &Path, rel: &str, content: &str, message: &str) -> String {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", message]);
        git(dir, &["rev-parse", "HEAD"])
    }

    #[test]
    fn test_common_dir() {
        let (tmp, g) = init_test_repo();
        let dir = g.common_dir().unwrap();
        assert_eq!(dir.canonicalize().unwrap(), tmp.path().join(".git").canonicalize().unwrap());
    }

    #[test]
    fn test_resolve_commit_missing_branch() {
        let (_tmp, g) = init_test_repo();
        assert_eq!(g.resolve_commit("refs/heads/git-annex").unwrap(), None);
    }

    #[test]
    fn test_resolve_commit_existing_branch() {
        let (tmp, g) = init_test_repo();
        let head = commit_file(tmp.path(), "a.txt", "a", "first");
        assert_eq!(g.resolve_commit("refs/heads/meta").unwrap(), Some(head));
    }

    #[test]
    fn test_ls_tree_lists_nested_blobs() {
        let (tmp, g) = init_test_repo();
        let head = commit_file(tmp.path(), "abc/def/KEY1.log.met", "1s artist +A\n", "meta");

        let entries = g.ls_tree(&head).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "abc/def/KEY1.log.met");
        assert_eq!(entries[0].kind, "blob");
        assert_eq!(entries[0].oid.len(), 40);
    }

    #[test]
    fn test_diff_tree_reports_modify_and_delete() {
        let (tmp, g) = init_test_repo();
        commit_file(tmp.path(), "a.log.met", "1s artist +A\n", "one");
        let first = commit_file(tmp.path(), "b.log.met", "1s artist +B\n", "two");
        std::fs::write(tmp.path().join("a.log.met"), "1s artist +A2\n").unwrap();
        std::fs::remove_file(tmp.path().join("b.log.met")).unwrap();
        git(tmp.path(), &["add", "-A"]);
        git(tmp.path(), &["commit", "-q", "-m", "three"]);
        let second = git(tmp.path(), &["rev-parse", "HEAD"]);

        let mut diff = g.diff_tree(&first, &second).unwrap();
        diff.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(diff.len(), 2);
        assert_eq!(diff[0].path, "a.log.met");
        assert!(!diff[0].is_deletion());
        assert_eq!(diff[1].path, "b.log.met");
        assert!(diff[1].is_deletion());
    }

    #[test]
    fn test_is_ancestor_detects_amended_history() {
        let (tmp, g) = init_test_repo();
        commit_file(tmp.path(), "a.txt", "a", "first");
        let second = commit_file(tmp.path(), "b.txt", "b", "second");
        git(tmp.path(), &["commit", "-q", "--amend", "-m", "rewritten"]);
        let amended = git(tmp.path(), &["rev-parse", "HEAD"]);

        assert!(!g.is_ancestor(&second, &amended).unwrap());
        assert!(g.commit_exists(&second).unwrap());
        assert!(!g.commit_exists("0123456789012345678901234567890123456789").unwrap());
    }

    #[test]
    fn test_cat_file_batch_reads_many_blobs() {
        let (tmp, g) = init_test_repo();
        commit_file(tmp.path(), "a.log.met", "alpha\n", "one");
        let head = commit_file(tmp.path(), "b.log.met", "beta", "two");
        let entries = g.ls_tree(&head).unwrap();
        let oids: Vec<String> = entries.iter().map(|e| e.oid.clone()).collect();

        let blobs = g.cat_file_batch(&oids).unwrap();
        assert_eq!(blobs.len(), 2);
        let a = entries.iter().find(|e| e.path == "a.log.met").unwrap();
        assert_eq!(blobs[&a.oid], b"alpha\n");
    }

    #[test]
    fn test_cat_file_batch_empty_input() {
        let (_tmp, g) = init_test_repo();
        assert!(g.cat_file_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_format_command() {
        let formatted = Git::format_command(&["cat-file", "--batch"]);
        assert_eq!(formatted, "git cat-file --batch");
    }
}
