//! Per-file transform execution and return-value checking.

use std::path::Path;

use serde_json::Value;

use super::noop::SourceNormalizer;
use super::{Console, ExecutionContext, FileInfo, SandboxError, TransformOptions};
use crate::commands::FileCommand;
use crate::fs::parent_dir;
use crate::settings::{ArgumentRecord, EngineKind};

/// What a transform asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// New file content.
    Changed(String),
    /// Nothing returned: leave the file alone.
    Unchanged,
    /// `null` returned: the transform skipped the file.
    Skipped,
}

/// Check a transform's return value against `string | undefined | null`.
pub fn validate_return(value: Option<Value>) -> Result<TransformOutcome, SandboxError> {
    match value {
        None => Ok(TransformOutcome::Unchanged),
        Some(Value::Null) => Ok(TransformOutcome::Skipped),
        Some(Value::String(source)) => Ok(TransformOutcome::Changed(source)),
        Some(other) => Err(SandboxError::Validation(format!(
            "Expected string | undefined | null, received {}",
            value_type_name(&other)
        ))),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Settings shared by every file a worker processes.
pub struct FileRun<'a> {
    pub engine: EngineKind,
    pub arguments: &'a ArgumentRecord,
    pub format: bool,
    pub normalizer: &'a dyn SourceNormalizer,
}

/// Run one file through `context` and turn the result into commands.
///
/// Files created through the options side channel become create commands
/// (relative paths resolve against the transformed file's directory). A
/// changed result becomes an update unless it equals the input, or, for
/// JS/TS engines, differs only by redundant parentheses.
pub fn run_file(
    context: &mut dyn ExecutionContext,
    run: &FileRun<'_>,
    file: &FileInfo,
    console: &mut Console<'_>,
) -> Result<Vec<FileCommand>, SandboxError> {
    let mut options = TransformOptions::new(run.arguments.clone());
    let value = context.execute(file, &mut options, console)?;
    let outcome = validate_return(value)?;

    let mut commands: Vec<FileCommand> = options
        .take_created_files()
        .into_iter()
        .map(|(path, data)| FileCommand::CreateFile {
            new_path: resolve_created_path(&file.path, &path),
            new_data: data,
            format: run.format,
        })
        .collect();

    if let TransformOutcome::Changed(new_data) = outcome {
        let semantic_noop =
            run.engine.is_js_family() && run.normalizer.is_equivalent(&file.source, &new_data);
        if new_data != file.source && !semantic_noop {
            commands.push(FileCommand::UpdateFile {
                old_path: file.path.clone(),
                old_data: file.source.clone(),
                new_data,
                format: run.format,
            });
        } else if semantic_noop {
            tracing::debug!(path = %file.path.display(), "Eliding parenthesization-only change");
        }
    }

    Ok(commands)
}

fn resolve_created_path(file_path: &Path, created: &Path) -> std::path::PathBuf {
    if created.is_absolute() {
        return created.to_path_buf();
    }
    match parent_dir(file_path) {
        Some(parent) => parent.join(created),
        None => created.to_path_buf(),
    }
}
