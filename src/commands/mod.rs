//! File commands
//!
//! A codemod never writes files directly. Every engine produces
//! [`FileCommand`]s; they pass through the formatting stage
//! ([`format`]) and are then applied for real or previewed ([`apply`]).

pub mod apply;
pub mod format;

pub use apply::{apply_command, preview_path, PreviewRecord};
pub use format::{
    build_formatted_command, build_formatted_commands, CommandFormatter, FormatError,
    Formatter, FormatterRegistry,
};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A change to the file tree produced by a codemod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FileCommand {
    /// Create a new file (parent directories are created as needed)
    #[serde(rename_all = "camelCase")]
    CreateFile {
        new_path: PathBuf,
        new_data: String,
        format: bool,
    },
    /// Replace the content of an existing file
    #[serde(rename_all = "camelCase")]
    UpdateFile {
        old_path: PathBuf,
        old_data: String,
        new_data: String,
        format: bool,
    },
    #[serde(rename_all = "camelCase")]
    DeleteFile { old_path: PathBuf },
    #[serde(rename_all = "camelCase")]
    MoveFile { old_path: PathBuf, new_path: PathBuf },
    #[serde(rename_all = "camelCase")]
    CopyFile { old_path: PathBuf, new_path: PathBuf },
}

impl FileCommand {
    /// Stable kind name, also used when naming previews.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FileCommand::CreateFile { .. } => "createFile",
            FileCommand::UpdateFile { .. } => "updateFile",
            FileCommand::DeleteFile { .. } => "deleteFile",
            FileCommand::MoveFile { .. } => "moveFile",
            FileCommand::CopyFile { .. } => "copyFile",
        }
    }

    /// The path the command is about: the new path for creates, the old
    /// path for everything else.
    pub fn primary_path(&self) -> &Path {
        match self {
            FileCommand::CreateFile { new_path, .. } => new_path,
            FileCommand::UpdateFile { old_path, .. }
            | FileCommand::DeleteFile { old_path }
            | FileCommand::MoveFile { old_path, .. }
            | FileCommand::CopyFile { old_path, .. } => old_path,
        }
    }

    /// Human-readable description, used in logs.
    pub fn description(&self) -> String {
        match self {
            FileCommand::CreateFile { new_path, .. } => {
                format!("Create file: {}", new_path.display())
            }
            FileCommand::UpdateFile { old_path, .. } => {
                format!("Update file: {}", old_path.display())
            }
            FileCommand::DeleteFile { old_path } => {
                format!("Delete file: {}", old_path.display())
            }
            FileCommand::MoveFile { old_path, new_path } => {
                format!("Move: {} -> {}", old_path.display(), new_path.display())
            }
            FileCommand::CopyFile { old_path, new_path } => {
                format!("Copy: {} -> {}", old_path.display(), new_path.display())
            }
        }
    }
}

/// A [`FileCommand`] that has been through the formatting stage.
///
/// Only [`build_formatted_command`] constructs these, so holding one means
/// formatting and no-op elision already happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedFileCommand {
    #[serde(flatten)]
    command: FileCommand,
    formatted: bool,
}

impl FormattedFileCommand {
    pub(crate) fn new(command: FileCommand) -> Self {
        Self {
            command,
            formatted: true,
        }
    }

    pub fn command(&self) -> &FileCommand {
        &self.command
    }

    pub fn into_command(self) -> FileCommand {
        self.command
    }
}
