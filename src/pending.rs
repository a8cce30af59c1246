//! `PendingUploads`: the set of destination paths a receive worker has
//! opened for writing but not yet cleanly closed. The shutdown path
//! unlinks every entry still present.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct PendingUploads(Mutex<HashSet<PathBuf>>);

impl PendingUploads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: PathBuf) {
        self.0.lock().unwrap().insert(path);
    }

    pub fn remove(&self, path: &Path) {
        self.0.lock().unwrap().remove(path);
    }

    /// Unlink every path still registered, logging but not failing on
    /// individual I/O errors (the process is already tearing down).
    pub fn unlink_all(&self) {
        let mut guard = self.0.lock().unwrap();
        for path in guard.drain() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to unlink pending upload");
                }
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, path: &Path) -> bool {
        self.0.lock().unwrap().contains(path)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// RAII guard that registers a path in `PendingUploads` on creation
/// and removes it on drop, regardless of which exit path the holding
/// task takes (success, error, or cancellation).
pub struct PendingGuard<'a> {
    pending: &'a PendingUploads,
    path: PathBuf,
}

impl<'a> PendingGuard<'a> {
    pub fn new(pending: &'a PendingUploads, path: PathBuf) -> Self {
        pending.insert(path.clone());
        Self { pending, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_removes_path_on_drop() {
        let pending = PendingUploads::new();
        let path = PathBuf::from("/tmp/example-upload.bin");
        {
            let guard = PendingGuard::new(&pending, path.clone());
            assert!(pending.contains(guard.path()));
        }
        assert!(!pending.contains(&path));
    }

    #[test]
    fn unlink_all_removes_files_and_clears_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        std::fs::write(&path, b"partial").unwrap();

        let pending = PendingUploads::new();
        pending.insert(path.clone());
        pending.unlink_all();

        assert!(!path.exists());
        assert_eq!(pending.len(), 0);
    }
}
