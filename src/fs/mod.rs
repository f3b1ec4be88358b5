//! File system abstraction
//!
//! Every component of the engine reads and writes through the [`FileSystem`]
//! trait so that the same code path can run against the real disk or against
//! a disposable in-memory tree (recipe dry-run simulation, tests).

mod memory;
mod real;

pub use memory::MemoryFileSystem;
pub use real::RealFileSystem;

use std::io;
use std::ops::ControlFlow;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by [`FileSystem`] implementations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{} is neither a regular file nor a directory", .0.display())]
    UnsupportedEntry(PathBuf),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("blocking file task failed: {0}")]
    Task(String),
}

impl FsError {
    /// Wrap an `io::Error`, folding `NotFound` into its own variant.
    pub fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(path.to_path_buf())
        } else {
            FsError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Kind of a file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One child returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Synchronous file system used by the engine.
///
/// Implementations must be shareable across threads: the path walker runs on
/// a blocking task while the orchestrator reads files concurrently.
pub trait FileSystem: Send + Sync {
    /// Whether `path` is a file or a directory.
    fn entry_kind(&self, path: &Path) -> Result<EntryKind, FsError>;

    fn read_to_string(&self, path: &Path) -> Result<String, FsError>;

    /// Write `data` to `path`. The parent directory must already exist.
    fn write(&self, path: &Path, data: &str) -> Result<(), FsError>;

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

    fn remove_file(&self, path: &Path) -> Result<(), FsError>;

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Immediate children of a directory.
    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError>;

    /// Visit every regular file below `root` until `visit` breaks.
    fn walk_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(PathBuf) -> ControlFlow<()>,
    ) -> Result<(), FsError>;

    fn exists(&self, path: &Path) -> bool {
        self.entry_kind(path).is_ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.entry_kind(path), Ok(EntryKind::File))
    }
}

/// Lexically normalize a path: drops `.` components and resolves `..`
/// against the preceding component. Never touches the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Parent directory of `path`, if it has a non-empty one.
pub(crate) fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_drops_current_dir() {
        assert_eq!(
            normalize_path(Path::new("/code/./src/a.ts")),
            PathBuf::from("/code/src/a.ts")
        );
    }

    #[test]
    fn test_normalize_path_resolves_parent() {
        assert_eq!(
            normalize_path(Path::new("/code/src/../lib/b.ts")),
            PathBuf::from("/code/lib/b.ts")
        );
    }

    #[test]
    fn test_fs_error_maps_not_found() {
        let err = FsError::io(
            Path::new("/missing"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, FsError::NotFound(_)));
    }
}
