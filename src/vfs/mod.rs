//! Virtual file system overlay
//!
//! Records pending changes on top of a [`FileSystem`](crate::fs::FileSystem)
//! without touching it. Whole-tree engines (filemods) read and write through
//! the overlay; once the engine finishes, the overlay is turned into file
//! commands and discarded.

mod digest;
mod directory_index;
mod unified;

pub use digest::PathHashDigest;
pub use directory_index::DirectoryIndex;
pub use unified::{ChangeRecord, UnifiedEntry, UnifiedFileSystem};

use std::path::PathBuf;

use thiserror::Error;

use crate::fs::FsError;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("the file {} has already been deleted", .0.display())]
    Deleted(PathBuf),

    #[error("the file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Fs(#[from] FsError),
}
