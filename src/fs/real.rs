//! Disk-backed file system.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{DirEntry, EntryKind, FileSystem, FsError};

/// [`FileSystem`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl RealFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFileSystem {
    fn entry_kind(&self, path: &Path) -> Result<EntryKind, FsError> {
        let metadata = std::fs::metadata(path).map_err(|e| FsError::io(path, e))?;
        if metadata.is_dir() {
            Ok(EntryKind::Directory)
        } else if metadata.is_file() {
            Ok(EntryKind::File)
        } else {
            Err(FsError::UnsupportedEntry(path.to_path_buf()))
        }
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        std::fs::read_to_string(path).map_err(|e| FsError::io(path, e))
    }

    fn write(&self, path: &Path, data: &str) -> Result<(), FsError> {
        std::fs::write(path, data).map_err(|e| FsError::io(path, e))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir_all(path).map_err(|e| FsError::io(path, e))
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        std::fs::remove_file(path).map_err(|e| FsError::io(path, e))
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        std::fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| FsError::io(from, e))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|e| FsError::io(path, e))? {
            let entry = entry.map_err(|e| FsError::io(path, e))?;
            let file_type = entry.file_type().map_err(|e| FsError::io(path, e))?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                continue;
            };
            entries.push(DirEntry {
                path: entry.path(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn walk_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(PathBuf) -> ControlFlow<()>,
    ) -> Result<(), FsError> {
        if !root.exists() {
            return Err(FsError::NotFound(root.to_path_buf()));
        }

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry during walk");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if visit(entry.into_path()).is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_walk_files_visits_nested_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("src/nested")).unwrap();
        std::fs::write(temp.path().join("src/a.ts"), "a").unwrap();
        std::fs::write(temp.path().join("src/nested/b.ts"), "b").unwrap();

        let fs = RealFileSystem::new();
        let mut seen = Vec::new();
        fs.walk_files(temp.path(), &mut |path| {
            seen.push(path);
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&temp.path().join("src/nested/b.ts")));
    }

    #[test]
    fn test_walk_files_stops_on_break() {
        let temp = TempDir::new().unwrap();
        for name in ["a.ts", "b.ts", "c.ts"] {
            std::fs::write(temp.path().join(name), name).unwrap();
        }

        let fs = RealFileSystem::new();
        let mut count = 0;
        fs.walk_files(temp.path(), &mut |_| {
            count += 1;
            ControlFlow::Break(())
        })
        .unwrap();

        assert_eq!(count, 1);
    }

    #[test]
    fn test_entry_kind_and_missing_path() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let fs = RealFileSystem::new();
        assert_eq!(fs.entry_kind(&file).unwrap(), EntryKind::File);
        assert_eq!(fs.entry_kind(temp.path()).unwrap(), EntryKind::Directory);
        assert!(matches!(
            fs.entry_kind(&temp.path().join("missing")),
            Err(FsError::NotFound(_))
        ));
    }
}
