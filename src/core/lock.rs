//! Single-writer lock for the index

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, TryLockError};

use fs2::FileExt as _;

/// A filesystem-backed lock shared by every process writing the same index.
///
/// The lock is released when the returned value is dropped.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
    // fs2 locks are process-scoped on Unix and don't exclude other threads of
    // the same process, so an in-process mutex guard is held as well.
    _guard: MutexGuard<'static, ()>,
}

impl IndexLock {
    /// Acquire an exclusive lock on `path`, creating the lockfile if needed.
    ///
    /// This call blocks until the lock is available.
    pub fn lock_exclusive(path: &Path) -> std::io::Result<Self> {
        let guard = process_lock_for_path(path)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let file = open_lock_file(path)?;
        file.lock_exclusive()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    /// Acquire the lock only if nobody else holds it
    pub fn try_lock_exclusive(path: &Path) -> std::io::Result<Option<Self>> {
        let guard = match process_lock_for_path(path).try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(None),
        };

        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
                _guard: guard,
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

fn process_lock_for_path(path: &Path) -> &'static Mutex<()> {
    static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();
    let locks = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = locks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = map.get(path) {
        return existing;
    }

    let mutex: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
    map.insert(path.to_path_buf(), mutex);
    mutex
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_try_lock_fails_while_held() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("index.lock");

        let held = IndexLock::lock_exclusive(&path).unwrap();
        assert!(IndexLock::try_lock_exclusive(&path).unwrap().is_none());
        drop(held);

        let again = IndexLock::try_lock_exclusive(&path).unwrap();
        assert!(again.is_some());
        assert_eq!(again.unwrap().path(), path.as_path());
    }

    #[test]
    fn test_lock_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested/dir/index.lock");
        let _lock = IndexLock::lock_exclusive(&path).unwrap();
        assert!(path.exists());
    }
}
