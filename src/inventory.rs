//! File inventory and space accounting.
//!
//! Holds the set of basenames this node is willing to serve, plus the
//! two-counter space-accounting model described in the data model:
//! `available_space` and `negative_space` are never both nonzero at
//! the same time.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One served file: its basename (never containing `/`) and its size
/// as last observed — either at index time, or as announced by an
/// `ADD` reservation before the bytes exist on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub basename: String,
    pub size: u64,
}

/// The inventory of served files plus the shared-folder space
/// accounting. Owned exclusively by the dispatcher; transfer tasks
/// never get a mutable reference to it directly — reservation and
/// finalization happen through the dispatcher, behind the `Mutex`
/// the caller wraps this in.
#[derive(Debug)]
pub struct Inventory {
    dir: PathBuf,
    max_space: u64,
    available_space: u64,
    negative_space: u64,
    // Insertion order is preserved explicitly (a `HashMap` would not)
    // so that `search`/`find` and `LIST` segmentation are deterministic
    // within a run, per the data model's stability requirement.
    records: Vec<FileRecord>,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("shared folder '{0}' does not exist or is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to read shared folder '{0}': {1}")]
    Io(PathBuf, #[source] io::Error),
}

impl Inventory {
    /// Enumerate the regular files at the top level of `dir`, record
    /// basename and size for each, and derive the initial space
    /// accounting against `max_space`.
    pub fn index(dir: &Path, max_space: u64) -> Result<Inventory, IndexError> {
        if !dir.is_dir() {
            return Err(IndexError::NotADirectory(dir.to_path_buf()));
        }

        let mut records = Vec::new();
        let entries =
            fs::read_dir(dir).map_err(|e| IndexError::Io(dir.to_path_buf(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| IndexError::Io(dir.to_path_buf(), e))?;
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            let basename = entry.file_name().to_string_lossy().into_owned();
            records.push(FileRecord {
                basename,
                size: metadata.len(),
            });
        }

        let total: u64 = records.iter().map(|r| r.size).sum();
        let (available_space, negative_space) = if total > max_space {
            (0, total - max_space)
        } else {
            (max_space - total, 0)
        };

        Ok(Inventory {
            dir: dir.to_path_buf(),
            max_space,
            available_space,
            negative_space,
            records,
        })
    }

    pub fn available_space(&self) -> u64 {
        self.available_space
    }

    pub fn negative_space(&self) -> u64 {
        self.negative_space
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Exact basename match.
    pub fn find(&self, basename: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.basename == basename)
    }

    /// Every basename containing `substring`. An empty substring
    /// matches all records. Order is insertion order.
    pub fn search(&self, substring: &str) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.basename.contains(substring))
            .map(|r| r.basename.as_str())
            .collect()
    }

    /// Iterate all basenames in insertion order.
    pub fn basenames(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.basename.as_str())
    }

    /// Reserve `size` bytes from `available_space`. Succeeds only if
    /// enough space is available; debits on success.
    pub fn reserve(&mut self, size: u64) -> bool {
        if self.available_space >= size {
            self.available_space -= size;
            true
        } else {
            false
        }
    }

    /// Register a basename after a successful `reserve`. The caller
    /// is responsible for having validated that the basename is new,
    /// non-empty, and free of `/` (the invariants the inventory
    /// itself always upholds for anything it accepts).
    pub fn register_basename(&mut self, basename: String, size: u64) {
        debug_assert!(!basename.is_empty() && !basename.contains('/'));
        debug_assert!(self.find(&basename).is_none());
        self.records.push(FileRecord { basename, size });
    }

    /// If `basename` is present, delete the on-disk file, drop the
    /// record, and credit the freed space (negative_space first, then
    /// available_space). A no-op, returning `Ok(false)`, if absent.
    pub fn remove(&mut self, basename: &str) -> io::Result<bool> {
        let Some(pos) = self.records.iter().position(|r| r.basename == basename) else {
            return Ok(false);
        };
        let record = self.records.remove(pos);
        let path = self.dir.join(&record.basename);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.credit(record.size);
        Ok(true)
    }

    /// Credit `size` bytes back into the accounting: negative_space is
    /// drawn down first, the remainder (if any) goes to
    /// available_space.
    fn credit(&mut self, size: u64) {
        let from_negative = size.min(self.negative_space);
        self.negative_space -= from_negative;
        self.available_space += size - from_negative;
    }

    /// Invariant check used by tests: exactly one of
    /// `available_space`/`negative_space` may be nonzero, and the sum
    /// identity from the data model must hold.
    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.available_space * self.negative_space, 0);
        let total: u64 = self.records.iter().map(|r| r.size).sum();
        assert_eq!(
            total + self.available_space - self.negative_space,
            self.max_space
        );
        for r in &self.records {
            assert!(!r.basename.is_empty());
            assert!(!r.basename.contains('/'));
        }
    }
}
