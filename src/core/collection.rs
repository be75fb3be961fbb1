//! Collection discovery and layout

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Directory under the git dir holding the index
const INDEX_DIR: &str = "crate-index";

/// Per-collection config file at the working-tree root
pub const COLLECTION_CONFIG: &str = ".crate-index.yaml";

/// A git-annex managed music collection
#[derive(Debug, Clone)]
pub struct Collection {
    /// Working-tree root
    root: PathBuf,
    /// The repository's git directory (`.git`, or where a `.git` file points)
    git_dir: PathBuf,
}

impl Collection {
    /// Find the collection root by walking up from the current directory
    pub fn discover() -> Result<Self, CollectionError> {
        let current =
            std::env::current_dir().map_err(|e| CollectionError::IoError(e.to_string()))?;
        Self::discover_from(&current)
    }

    /// Find the collection root by walking up from the given directory
    pub fn discover_from(start: &Path) -> Result<Self, CollectionError> {
        let mut current = start
            .canonicalize()
            .map_err(|e| CollectionError::IoError(format!("{}: {}", start.display(), e)))?;

        loop {
            let dot_git = current.join(".git");
            if dot_git.is_dir() {
                return Ok(Self {
                    root: current,
                    git_dir: dot_git,
                });
            }
            if dot_git.is_file() {
                let git_dir = read_gitdir_file(&dot_git, &current)?;
                return Ok(Self {
                    root: current,
                    git_dir,
                });
            }

            if !current.pop() {
                return Err(CollectionError::NotFound {
                    searched_from: start.to_path_buf(),
                });
            }
        }
    }

    /// Working-tree root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Location of the index database
    pub fn index_path(&self) -> PathBuf {
        self.git_dir.join(INDEX_DIR).join("index.db")
    }

    /// Location of the per-collection config file
    pub fn config_path(&self) -> PathBuf {
        self.root.join(COLLECTION_CONFIG)
    }
}

/// Resolve a `.git` file of the form `gitdir: <path>` (worktrees, submodules)
fn read_gitdir_file(dot_git: &Path, root: &Path) -> Result<PathBuf, CollectionError> {
    let contents =
        std::fs::read_to_string(dot_git).map_err(|e| CollectionError::IoError(e.to_string()))?;
    let target = contents
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CollectionError::BadGitFile(dot_git.to_path_buf()))?;

    let path = Path::new(target);
    Ok(if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    })
}

/// Errors that can occur while locating a collection
#[derive(Debug, Error, Diagnostic)]
pub enum CollectionError {
    #[error("not a git repository (searched from {searched_from:?})")]
    #[diagnostic(
        code(crate_index::collection::not_found),
        help("run inside a git-annex repository or pass --repo")
    )]
    NotFound { searched_from: PathBuf },

    #[error("malformed .git file at {0:?}")]
    #[diagnostic(code(crate_index::collection::bad_git_file))]
    BadGitFile(PathBuf),

    #[error("IO error: {0}")]
    #[diagnostic(code(crate_index::collection::io))]
    IoError(String),
}
