//! Applying commands to a file system.
//!
//! A wet run mutates the target tree. A dry run leaves it alone and writes
//! the would-be content of every created or updated file into the preview
//! directory under a content-addressed name.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{FileCommand, FormattedFileCommand};
use crate::fs::{parent_dir, FileSystem, FsError};
use crate::settings::RunSettings;

/// Where the preview of a dry-run change was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRecord {
    pub kind: String,
    pub original_path: PathBuf,
    pub preview_path: PathBuf,
}

/// Apply `command` according to `run_settings`.
///
/// Returns the preview record for dry-run creates and updates, `None`
/// otherwise.
pub fn apply_command(
    fs: &dyn FileSystem,
    run_settings: &RunSettings,
    command: &FormattedFileCommand,
) -> Result<Option<PreviewRecord>, FsError> {
    match run_settings {
        RunSettings::Wet { .. } => {
            apply_wet(fs, command.command())?;
            Ok(None)
        }
        RunSettings::Dry { output_dir, .. } => apply_dry(fs, output_dir, command.command()),
    }
}

fn apply_wet(fs: &dyn FileSystem, command: &FileCommand) -> Result<(), FsError> {
    tracing::debug!(command = %command.description(), "Applying file command");
    match command {
        FileCommand::CreateFile {
            new_path, new_data, ..
        } => {
            ensure_parent(fs, new_path)?;
            fs.write(new_path, new_data)
        }
        FileCommand::UpdateFile {
            old_path, new_data, ..
        } => fs.write(old_path, new_data),
        FileCommand::DeleteFile { old_path } => fs.remove_file(old_path),
        FileCommand::MoveFile { old_path, new_path } => {
            ensure_parent(fs, new_path)?;
            fs.copy_file(old_path, new_path)?;
            fs.remove_file(old_path)
        }
        FileCommand::CopyFile { old_path, new_path } => {
            ensure_parent(fs, new_path)?;
            fs.copy_file(old_path, new_path)
        }
    }
}

fn apply_dry(
    fs: &dyn FileSystem,
    output_dir: &Path,
    command: &FileCommand,
) -> Result<Option<PreviewRecord>, FsError> {
    let (original_path, data) = match command {
        FileCommand::CreateFile {
            new_path, new_data, ..
        } => (new_path, new_data),
        FileCommand::UpdateFile {
            old_path, new_data, ..
        } => (old_path, new_data),
        FileCommand::DeleteFile { .. }
        | FileCommand::MoveFile { .. }
        | FileCommand::CopyFile { .. } => return Ok(None),
    };

    fs.create_dir_all(output_dir)?;
    let preview = preview_path(output_dir, command.kind_name(), original_path, data);
    fs.write(&preview, data)?;

    Ok(Some(PreviewRecord {
        kind: command.kind_name().to_string(),
        original_path: original_path.clone(),
        preview_path: preview,
    }))
}

/// `output_dir/<base64url(sha256(kind, path, data))><.ext>`
pub fn preview_path(output_dir: &Path, kind: &str, path: &Path, data: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(data.as_bytes());
    let mut name = URL_SAFE_NO_PAD.encode(hasher.finalize());

    if let Some(extension) = path.extension() {
        name.push('.');
        name.push_str(&extension.to_string_lossy());
    }
    output_dir.join(name)
}

fn ensure_parent(fs: &dyn FileSystem, path: &Path) -> Result<(), FsError> {
    match parent_dir(path) {
        Some(parent) => fs.create_dir_all(parent),
        None => Ok(()),
    }
}
