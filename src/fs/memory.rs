//! In-memory file system
//!
//! Used as the scratch tree for recipe dry-run simulation: seeded with the
//! files a recipe will see, mutated by every step, then diffed against the
//! seed. Nothing here ever reaches the disk.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{normalize_path, parent_dir, DirEntry, EntryKind, FileSystem, FsError};

#[derive(Debug, Default)]
struct MemoryTree {
    files: BTreeMap<PathBuf, String>,
    directories: BTreeSet<PathBuf>,
}

impl MemoryTree {
    fn add_ancestors(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            if !self.directories.insert(ancestor.to_path_buf()) {
                break;
            }
        }
    }
}

/// Thread-safe in-memory [`FileSystem`].
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    tree: RwLock<MemoryTree>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, contents)` pairs, creating parent directories.
    pub fn from_files<I, P, S>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: AsRef<Path>,
        S: Into<String>,
    {
        let fs = Self::new();
        for (path, data) in files {
            fs.seed_file(path.as_ref(), data);
        }
        fs
    }

    /// Insert a file and all of its ancestors.
    pub fn seed_file(&self, path: &Path, data: impl Into<String>) {
        let path = normalize_path(path);
        let mut tree = self.write_tree();
        tree.add_ancestors(&path);
        tree.files.insert(path, data.into());
    }

    /// Snapshot of every file and its contents, ordered by path.
    pub fn files(&self) -> BTreeMap<PathBuf, String> {
        self.read_tree().files.clone()
    }

    fn read_tree(&self) -> RwLockReadGuard<'_, MemoryTree> {
        self.tree.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_tree(&self) -> RwLockWriteGuard<'_, MemoryTree> {
        self.tree.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FileSystem for MemoryFileSystem {
    fn entry_kind(&self, path: &Path) -> Result<EntryKind, FsError> {
        let path = normalize_path(path);
        let tree = self.read_tree();
        if tree.files.contains_key(&path) {
            Ok(EntryKind::File)
        } else if tree.directories.contains(&path) {
            Ok(EntryKind::Directory)
        } else {
            Err(FsError::NotFound(path))
        }
    }

    fn read_to_string(&self, path: &Path) -> Result<String, FsError> {
        let path = normalize_path(path);
        self.read_tree()
            .files
            .get(&path)
            .cloned()
            .ok_or(FsError::NotFound(path))
    }

    fn write(&self, path: &Path, data: &str) -> Result<(), FsError> {
        let path = normalize_path(path);
        let mut tree = self.write_tree();
        if let Some(parent) = parent_dir(&path) {
            if !tree.directories.contains(parent) {
                return Err(FsError::NotFound(parent.to_path_buf()));
            }
        }
        if tree.directories.contains(&path) {
            return Err(FsError::UnsupportedEntry(path));
        }
        tree.files.insert(path, data.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
        let path = normalize_path(path);
        let mut tree = self.write_tree();
        if tree.files.contains_key(&path) {
            return Err(FsError::UnsupportedEntry(path));
        }
        tree.add_ancestors(&path);
        tree.directories.insert(path);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), FsError> {
        let path = normalize_path(path);
        self.write_tree()
            .files
            .remove(&path)
            .map(|_| ())
            .ok_or(FsError::NotFound(path))
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let data = self.read_to_string(from)?;
        self.write(to, &data)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>, FsError> {
        let path = normalize_path(path);
        let tree = self.read_tree();
        if !tree.directories.contains(&path) {
            return Err(FsError::NotFound(path));
        }

        let directories = tree
            .directories
            .iter()
            .filter(|dir| dir.parent() == Some(path.as_path()))
            .map(|dir| DirEntry {
                path: dir.clone(),
                kind: EntryKind::Directory,
            });
        let files = tree
            .files
            .keys()
            .filter(|file| file.parent() == Some(path.as_path()))
            .map(|file| DirEntry {
                path: file.clone(),
                kind: EntryKind::File,
            });

        let mut entries: Vec<DirEntry> = directories.chain(files).collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn walk_files(
        &self,
        root: &Path,
        visit: &mut dyn FnMut(PathBuf) -> ControlFlow<()>,
    ) -> Result<(), FsError> {
        let root = normalize_path(root);
        // Snapshot so the lock is not held while the visitor blocks.
        let paths: Vec<PathBuf> = {
            let tree = self.read_tree();
            if !tree.directories.contains(&root) && !tree.files.contains_key(&root) {
                return Err(FsError::NotFound(root));
            }
            tree.files
                .keys()
                .filter(|file| file.starts_with(&root))
                .cloned()
                .collect()
        };

        for path in paths {
            if visit(path).is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_creates_ancestors() {
        let fs = MemoryFileSystem::from_files([("/code/src/a.ts", "a")]);
        assert_eq!(fs.entry_kind(Path::new("/code")).unwrap(), EntryKind::Directory);
        assert_eq!(
            fs.entry_kind(Path::new("/code/src")).unwrap(),
            EntryKind::Directory
        );
        assert_eq!(
            fs.read_to_string(Path::new("/code/src/a.ts")).unwrap(),
            "a"
        );
    }

    #[test]
    fn test_write_requires_parent_directory() {
        let fs = MemoryFileSystem::new();
        let result = fs.write(Path::new("/nowhere/file.txt"), "x");
        assert!(matches!(result, Err(FsError::NotFound(_))));

        fs.create_dir_all(Path::new("/nowhere")).unwrap();
        fs.write(Path::new("/nowhere/file.txt"), "x").unwrap();
        assert!(fs.is_file(Path::new("/nowhere/file.txt")));
    }

    #[test]
    fn test_read_dir_lists_direct_children_only() {
        let fs = MemoryFileSystem::from_files([
            ("/code/a.ts", "a"),
            ("/code/lib/b.ts", "b"),
            ("/code/lib/deep/c.ts", "c"),
        ]);

        let entries = fs.read_dir(Path::new("/code")).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/code/a.ts"), PathBuf::from("/code/lib")]
        );
        assert_eq!(entries[1].kind, EntryKind::Directory);
    }

    #[test]
    fn test_remove_and_copy() {
        let fs = MemoryFileSystem::from_files([("/code/a.ts", "a")]);
        fs.copy_file(Path::new("/code/a.ts"), Path::new("/code/b.ts"))
            .unwrap();
        fs.remove_file(Path::new("/code/a.ts")).unwrap();

        let files = fs.files();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get(Path::new("/code/b.ts")).map(String::as_str), Some("a"));
        assert!(fs.remove_file(Path::new("/code/a.ts")).is_err());
    }

    #[test]
    fn test_walk_files_scoped_to_root() {
        let fs = MemoryFileSystem::from_files([
            ("/code/a.ts", "a"),
            ("/other/b.ts", "b"),
        ]);

        let mut seen = Vec::new();
        fs.walk_files(Path::new("/code"), &mut |path| {
            seen.push(path);
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(seen, vec![PathBuf::from("/code/a.ts")]);
    }
}
