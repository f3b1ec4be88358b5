//! Formatting stage
//!
//! Generated code is passed through a formatter chosen by file extension.
//! Formatting is best effort: if the formatter fails, the unformatted text is
//! used and a warning is logged.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use super::{FileCommand, FormattedFileCommand};

/// Placeholder replaced by the file path in [`CommandFormatter`] arguments.
pub const PATH_PLACEHOLDER: &str = "{path}";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("failed to run formatter {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("formatter {program} exited unsuccessfully: {stderr}")]
    Failed { program: String, stderr: String },

    #[error("formatter produced invalid UTF-8")]
    InvalidOutput,

    #[error("{0}")]
    Rejected(String),
}

/// Formats source text for one kind of file.
pub trait Formatter: Send + Sync {
    fn format(&self, path: &Path, data: &str) -> Result<String, FormatError>;
}

impl<F> Formatter for F
where
    F: Fn(&Path, &str) -> Result<String, FormatError> + Send + Sync,
{
    fn format(&self, path: &Path, data: &str) -> Result<String, FormatError> {
        self(path, data)
    }
}

/// Runs an external formatter that reads source on stdin and writes the
/// result to stdout, e.g. `prettier --stdin-filepath {path}`.
#[derive(Debug, Clone)]
pub struct CommandFormatter {
    program: String,
    args: Vec<String>,
}

impl CommandFormatter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn args_for(&self, path: &Path) -> Vec<String> {
        let path = path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(PATH_PLACEHOLDER, &path))
            .collect()
    }
}

impl Formatter for CommandFormatter {
    fn format(&self, path: &Path, data: &str) -> Result<String, FormatError> {
        let output = duct::cmd(&self.program, self.args_for(path))
            .stdin_bytes(data.as_bytes().to_vec())
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|source| FormatError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(FormatError::Failed {
                program: self.program.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|_| FormatError::InvalidOutput)
    }
}

/// Formatters keyed by lowercase file extension.
#[derive(Clone, Default)]
pub struct FormatterRegistry {
    by_extension: HashMap<String, Arc<dyn Formatter>>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `formatter` for each extension (without the dot).
    pub fn with_formatter(mut self, extensions: &[&str], formatter: Arc<dyn Formatter>) -> Self {
        for extension in extensions {
            self.by_extension
                .insert(extension.to_ascii_lowercase(), Arc::clone(&formatter));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }

    /// Format `data` for `path`. Returns the input unchanged when no
    /// formatter is registered or the formatter fails.
    pub fn format_text(&self, path: &Path, data: &str) -> String {
        let Some(formatter) = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .and_then(|ext| self.by_extension.get(&ext))
        else {
            return data.to_string();
        };

        match formatter.format(path, data) {
            Ok(formatted) => formatted,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Formatter failed, keeping unformatted output");
                data.to_string()
            }
        }
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut extensions: Vec<&String> = self.by_extension.keys().collect();
        extensions.sort();
        f.debug_struct("FormatterRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

/// Run one command through the formatting stage.
///
/// Create/update data is formatted when the command asks for it. An update
/// whose formatted content equals the old content is dropped (`None`).
pub fn build_formatted_command(
    registry: &FormatterRegistry,
    command: FileCommand,
) -> Option<FormattedFileCommand> {
    let command = match command {
        FileCommand::CreateFile {
            new_path,
            new_data,
            format,
        } => {
            let new_data = if format {
                registry.format_text(&new_path, &new_data)
            } else {
                new_data
            };
            FileCommand::CreateFile {
                new_path,
                new_data,
                format,
            }
        }
        FileCommand::UpdateFile {
            old_path,
            old_data,
            new_data,
            format,
        } => {
            let new_data = if format {
                registry.format_text(&old_path, &new_data)
            } else {
                new_data
            };
            if new_data == old_data {
                tracing::debug!(path = %old_path.display(), "Dropping update without changes");
                return None;
            }
            FileCommand::UpdateFile {
                old_path,
                old_data,
                new_data,
                format,
            }
        }
        other => other,
    };

    Some(FormattedFileCommand::new(command))
}

pub fn build_formatted_commands(
    registry: &FormatterRegistry,
    commands: impl IntoIterator<Item = FileCommand>,
) -> Vec<FormattedFileCommand> {
    commands
        .into_iter()
        .filter_map(|command| build_formatted_command(registry, command))
        .collect()
}
