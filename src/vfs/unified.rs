//! Unified file system: underlying file system plus pending changes.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{DirectoryIndex, PathHashDigest, VfsError};
use crate::commands::FileCommand;
use crate::fs::{normalize_path, parent_dir, EntryKind, FileSystem};
use crate::patterns::GlobMatcher;

/// A known file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedEntry {
    pub kind: EntryKind,
    pub path: PathBuf,
}

/// Pending change for one path.
///
/// `old_data` is the underlying content when the path was first touched in
/// this run (`None`: the file did not exist). It survives later writes, so
/// the final command always diffs against the original state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
    Upsert {
        old_data: Option<String>,
        new_data: String,
    },
    Tombstone {
        old_data: Option<String>,
    },
}

impl ChangeRecord {
    fn baseline(&self) -> Option<&String> {
        match self {
            ChangeRecord::Upsert { old_data, .. } | ChangeRecord::Tombstone { old_data } => {
                old_data.as_ref()
            }
        }
    }
}

/// Overlay of pending changes over a [`FileSystem`].
///
/// Owned by exactly one engine invocation; nothing here is written to the
/// underlying file system.
pub struct UnifiedFileSystem {
    fs: Arc<dyn FileSystem>,
    entries: HashMap<PathHashDigest, UnifiedEntry>,
    changes: HashMap<PathHashDigest, ChangeRecord>,
    /// First-creation order of change records.
    change_order: Vec<(PathHashDigest, PathBuf)>,
    directory_index: DirectoryIndex,
}

impl UnifiedFileSystem {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            entries: HashMap::new(),
            changes: HashMap::new(),
            change_order: Vec::new(),
            directory_index: DirectoryIndex::new(),
        }
    }

    /// Resolve and cache the kind of `path`. Tombstoned paths resolve to `None`.
    pub fn upsert_entry(&mut self, path: &Path) -> Option<UnifiedEntry> {
        let path = normalize_path(path);
        let digest = PathHashDigest::of(&path);
        if self.is_tombstoned(&digest) {
            return None;
        }
        if let Some(entry) = self.entries.get(&digest) {
            return Some(entry.clone());
        }

        let kind = self.fs.entry_kind(&path).ok()?;
        let entry = UnifiedEntry { kind, path };
        self.entries.insert(digest, entry.clone());
        Some(entry)
    }

    pub fn upsert_directory(&mut self, path: &Path) -> Option<UnifiedEntry> {
        self.upsert_entry(path)
            .filter(|entry| entry.kind == EntryKind::Directory)
    }

    pub fn upsert_file(&mut self, path: &Path) -> Option<UnifiedEntry> {
        self.upsert_entry(path)
            .filter(|entry| entry.kind == EntryKind::File)
    }

    pub fn is_directory(&mut self, path: &Path) -> bool {
        self.upsert_directory(path).is_some()
    }

    pub fn exists(&mut self, path: &Path) -> bool {
        self.upsert_entry(path).is_some()
    }

    /// Children of `path`: the underlying listing merged with overlay state.
    ///
    /// Tombstoned children are left out; files created in this run are
    /// included. Results are sorted by path.
    pub fn read_directory(&mut self, path: &Path) -> Vec<PathBuf> {
        let path = normalize_path(path);
        let parent = PathHashDigest::of(&path);

        match self.fs.read_dir(&path) {
            Ok(listing) => {
                for child in listing {
                    let child_path = normalize_path(&child.path);
                    let digest = PathHashDigest::of(&child_path);
                    if self.is_tombstoned(&digest) {
                        self.directory_index.delete(&parent, &digest);
                        continue;
                    }
                    self.entries.entry(digest.clone()).or_insert(UnifiedEntry {
                        kind: child.kind,
                        path: child_path,
                    });
                    self.directory_index.upsert(&parent, &digest);
                }
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Underlying directory not readable");
            }
        }

        let mut paths: Vec<PathBuf> = self
            .directory_index
            .children(&parent)
            .filter(|digest| !self.is_tombstoned(digest))
            .filter_map(|digest| self.entries.get(digest))
            .map(|entry| entry.path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Current content of `path`.
    ///
    /// Falls back to the underlying file system, and to `""` when that read
    /// fails. Reading a tombstoned path is an error.
    pub fn read_file(&self, path: &Path) -> Result<String, VfsError> {
        let path = normalize_path(path);
        match self.changes.get(&PathHashDigest::of(&path)) {
            Some(ChangeRecord::Upsert { new_data, .. }) => Ok(new_data.clone()),
            Some(ChangeRecord::Tombstone { .. }) => Err(VfsError::Deleted(path)),
            None => Ok(self.fs.read_to_string(&path).unwrap_or_else(|e| {
                tracing::debug!(path = %path.display(), error = %e, "Underlying read failed, using empty content");
                String::new()
            })),
        }
    }

    pub fn delete_file(&mut self, path: &Path) {
        let path = normalize_path(path);
        let digest = PathHashDigest::of(&path);
        if let Some(parent) = parent_dir(&path) {
            self.directory_index
                .delete(&PathHashDigest::of(parent), &digest);
        }
        self.record_change(digest, &path, |old_data| ChangeRecord::Tombstone { old_data });
    }

    /// Move `old_path` to `new_path`: tombstone the old path and write its
    /// content at the new one.
    pub fn move_file(&mut self, old_path: &Path, new_path: &Path) -> Result<(), VfsError> {
        let old_path = normalize_path(old_path);
        if self.upsert_file(&old_path).is_none() {
            return if self.is_tombstoned(&PathHashDigest::of(&old_path)) {
                Err(VfsError::Deleted(old_path))
            } else {
                Err(VfsError::NotFound(old_path))
            };
        }

        let data = self.read_file(&old_path)?;
        self.delete_file(&old_path);
        self.upsert_data(new_path, data);
        Ok(())
    }

    /// Write `data` at `path`, creating the entry (and its parents) if needed.
    pub fn upsert_data(&mut self, path: &Path, data: impl Into<String>) {
        let path = normalize_path(path);
        let digest = PathHashDigest::of(&path);
        let new_data = data.into();

        self.register_ancestors(&path);
        self.entries.insert(
            digest.clone(),
            UnifiedEntry {
                kind: EntryKind::File,
                path: path.clone(),
            },
        );
        self.record_change(digest, &path, |old_data| ChangeRecord::Upsert {
            old_data,
            new_data,
        });
    }

    /// Glob the underlying file system below `root` and register the matches.
    pub fn get_file_paths(
        &mut self,
        root: &Path,
        matcher: &GlobMatcher,
    ) -> Result<Vec<PathBuf>, VfsError> {
        let mut matched = Vec::new();
        self.fs.walk_files(root, &mut |path| {
            if matcher.is_match(&path) {
                matched.push(normalize_path(&path));
            }
            ControlFlow::Continue(())
        })?;

        matched.retain(|path| !self.is_tombstoned(&PathHashDigest::of(path)));
        self.register_files(&matched);
        Ok(matched)
    }

    /// Register already-known file paths as file entries.
    pub fn register_files(&mut self, paths: &[PathBuf]) {
        for path in paths {
            let path = normalize_path(path);
            self.entries
                .entry(PathHashDigest::of(&path))
                .or_insert(UnifiedEntry {
                    kind: EntryKind::File,
                    path,
                });
        }
    }

    pub fn change(&self, path: &Path) -> Option<&ChangeRecord> {
        self.changes.get(&PathHashDigest::of(path))
    }

    /// One command per change record that actually changes something, in
    /// the order the records were first created.
    pub fn build_external_commands(&self, format: bool) -> Vec<FileCommand> {
        self.change_order
            .iter()
            .filter_map(|(digest, path)| {
                let command = match self.changes.get(digest)? {
                    ChangeRecord::Upsert {
                        old_data: Some(old_data),
                        new_data,
                    } => {
                        if old_data == new_data {
                            return None;
                        }
                        FileCommand::UpdateFile {
                            old_path: path.clone(),
                            old_data: old_data.clone(),
                            new_data: new_data.clone(),
                            format,
                        }
                    }
                    ChangeRecord::Upsert {
                        old_data: None,
                        new_data,
                    } => FileCommand::CreateFile {
                        new_path: path.clone(),
                        new_data: new_data.clone(),
                        format,
                    },
                    ChangeRecord::Tombstone { old_data: Some(_) } => FileCommand::DeleteFile {
                        old_path: path.clone(),
                    },
                    ChangeRecord::Tombstone { old_data: None } => return None,
                };
                Some(command)
            })
            .collect()
    }

    fn is_tombstoned(&self, digest: &PathHashDigest) -> bool {
        matches!(self.changes.get(digest), Some(ChangeRecord::Tombstone { .. }))
    }

    fn record_change<F>(&mut self, digest: PathHashDigest, path: &Path, make: F)
    where
        F: FnOnce(Option<String>) -> ChangeRecord,
    {
        let baseline = match self.changes.get(&digest) {
            Some(record) => record.baseline().cloned(),
            None => {
                self.change_order.push((digest.clone(), path.to_path_buf()));
                self.underlying_content(path)
            }
        };
        self.changes.insert(digest, make(baseline));
    }

    fn underlying_content(&self, path: &Path) -> Option<String> {
        if self.fs.is_file(path) {
            Some(self.fs.read_to_string(path).unwrap_or_default())
        } else {
            None
        }
    }

    fn register_ancestors(&mut self, path: &Path) {
        let mut child = path.to_path_buf();
        while let Some(parent) = parent_dir(&child).map(Path::to_path_buf) {
            let parent_digest = PathHashDigest::of(&parent);
            self.directory_index
                .upsert(&parent_digest, &PathHashDigest::of(&child));
            self.entries
                .entry(parent_digest)
                .or_insert_with(|| UnifiedEntry {
                    kind: EntryKind::Directory,
                    path: parent.clone(),
                });
            child = parent;
        }
    }
}
