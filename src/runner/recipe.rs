//! Recipe execution.
//!
//! A wet recipe runs its steps one after another against the target, each
//! step's commands applied before the next step starts.
//!
//! A dry recipe must preview the combined effect of all steps without
//! touching the target. It copies the matched files into a scratch
//! [`MemoryFileSystem`], runs every step there as a wet run, and finally
//! diffs the scratch tree against the copy to produce one aggregate set of
//! commands.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::{no_files, run_codemod, EngineContext, RunCallbacks, RunResult};
use crate::commands::{apply_command, build_formatted_commands, FileCommand, FormattedFileCommand};
use crate::error::RunnerError;
use crate::fs::{FileSystem, MemoryFileSystem};
use crate::messages::{CodemodExecutionError, PrinterMessage};
use crate::patterns::{build_patterns, collect_paths, GlobMatcher};
use crate::settings::{ArgumentRecord, CodemodDescriptor, FlowSettings, RunSettings};

/// How step messages reach the recipe's callbacks.
enum StepMode {
    /// Forward as-is, progress relabeled with the step name.
    Forward,
    /// Progress rescaled across all steps over the recipe's `total` files;
    /// per-step `finish` dropped.
    Simulate {
        index: usize,
        steps: usize,
        total: usize,
    },
}

/// Callbacks for one recipe step. Commands are captured instead of
/// forwarded; the recipe decides what to do with them.
struct StepCallbacks<'a> {
    inner: &'a mut dyn RunCallbacks,
    step_name: Option<String>,
    mode: StepMode,
    commands: Vec<FormattedFileCommand>,
}

impl<'a> StepCallbacks<'a> {
    fn new(inner: &'a mut dyn RunCallbacks, step: &CodemodDescriptor, mode: StepMode) -> Self {
        Self {
            inner,
            step_name: step.name.clone(),
            mode,
            commands: Vec::new(),
        }
    }
}

impl RunCallbacks for StepCallbacks<'_> {
    fn on_command(&mut self, command: FormattedFileCommand) {
        self.commands.push(command);
    }

    fn on_message(&mut self, message: PrinterMessage) {
        let message = match (message, &self.mode) {
            (PrinterMessage::Finish, StepMode::Simulate { .. }) => return,
            (
                PrinterMessage::Progress {
                    processed_file_number,
                    total_file_number,
                    processed_file_name,
                    ..
                },
                mode,
            ) => {
                let (processed, total) = match mode {
                    StepMode::Forward => (processed_file_number, total_file_number),
                    StepMode::Simulate {
                        index,
                        steps,
                        total,
                    } => (total * index + processed_file_number, total * steps),
                };
                PrinterMessage::Progress {
                    codemod_name: self.step_name.clone(),
                    processed_file_number: processed,
                    total_file_number: total,
                    processed_file_name,
                }
            }
            (other, _) => other,
        };
        self.inner.on_message(message);
    }

    fn on_error(&mut self, error: CodemodExecutionError) {
        self.inner.on_error(error);
    }
}

pub(super) async fn run_wet(
    fs: Arc<dyn FileSystem>,
    recipe: &CodemodDescriptor,
    flow_settings: &FlowSettings,
    run_settings: &RunSettings,
    callbacks: &mut dyn RunCallbacks,
    safe_arguments: &ArgumentRecord,
    engine: &EngineContext,
) -> Result<(), RunnerError> {
    let mut all_commands = Vec::new();

    for (index, step) in recipe.codemods().iter().enumerate() {
        tracing::info!(
            recipe = %recipe.display_name(),
            step = index + 1,
            steps = recipe.codemods().len(),
            codemod = %step.display_name(),
            "Running recipe step"
        );

        let mut step_callbacks = StepCallbacks::new(&mut *callbacks, step, StepMode::Forward);
        run_codemod(
            Arc::clone(&fs),
            step,
            flow_settings,
            run_settings,
            &mut step_callbacks,
            safe_arguments,
            engine,
        )
        .await?;
        let commands = step_callbacks.commands;

        for command in &commands {
            apply_command(fs.as_ref(), run_settings, command)?;
        }

        callbacks.on_success(&RunResult {
            codemod_name: step.name.clone(),
            recipe_name: recipe.name.clone(),
            commands: commands.clone(),
        });
        all_commands.extend(commands);
    }

    callbacks.on_success(&RunResult {
        codemod_name: recipe.name.clone(),
        recipe_name: recipe.name.clone(),
        commands: all_commands,
    });
    Ok(())
}

pub(super) async fn run_dry(
    fs: Arc<dyn FileSystem>,
    recipe: &CodemodDescriptor,
    flow_settings: &FlowSettings,
    run_settings: &RunSettings,
    callbacks: &mut dyn RunCallbacks,
    safe_arguments: &ArgumentRecord,
    engine: &EngineContext,
) -> Result<(), RunnerError> {
    let patterns = build_patterns(fs.as_ref(), flow_settings, recipe, None, None)?;
    let matcher = GlobMatcher::from_patterns(&flow_settings.target, &patterns)?;
    let paths = collect_paths(fs.as_ref(), &flow_settings.target, &matcher)?;
    if paths.is_empty() {
        no_files(callbacks, flow_settings);
        return Ok(());
    }

    let scratch = Arc::new(MemoryFileSystem::new());
    let file_map = build_file_map(fs.as_ref(), &scratch, &paths);
    let scratch_fs: Arc<dyn FileSystem> = scratch.clone();
    let simulated = run_settings.as_wet();
    let steps = recipe.codemods().len();
    let mut deleted_paths = BTreeSet::new();

    tracing::info!(
        recipe = %recipe.display_name(),
        files = file_map.len(),
        steps,
        "Simulating recipe"
    );

    for (index, step) in recipe.codemods().iter().enumerate() {
        let mode = StepMode::Simulate {
            index,
            steps,
            total: file_map.len(),
        };
        let mut step_callbacks = StepCallbacks::new(&mut *callbacks, step, mode);
        run_codemod(
            Arc::clone(&scratch_fs),
            step,
            flow_settings,
            &simulated,
            &mut step_callbacks,
            safe_arguments,
            engine,
        )
        .await?;

        for command in &step_callbacks.commands {
            match command.command() {
                FileCommand::DeleteFile { old_path } | FileCommand::MoveFile { old_path, .. } => {
                    deleted_paths.insert(old_path.clone());
                }
                _ => {}
            }
            apply_command(scratch_fs.as_ref(), &simulated, command)?;
        }
    }

    let commands = diff_file_map(&file_map, &deleted_paths, &scratch.files(), flow_settings.format);
    let commands = build_formatted_commands(engine.formatters(), commands);
    tracing::info!(commands = commands.len(), "Recipe simulation complete");

    for command in commands {
        callbacks.on_command(command);
    }
    callbacks.on_message(PrinterMessage::Finish);
    Ok(())
}

/// Copy `paths` from `fs` into `scratch`, returning the original contents.
/// Files that cannot be read are left out of the simulation.
fn build_file_map(
    fs: &dyn FileSystem,
    scratch: &MemoryFileSystem,
    paths: &[PathBuf],
) -> BTreeMap<PathBuf, String> {
    let mut file_map = BTreeMap::new();
    for path in paths {
        match fs.read_to_string(path) {
            Ok(data) => {
                scratch.seed_file(path, data.clone());
                file_map.insert(path.clone(), data);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file in recipe simulation");
            }
        }
    }
    file_map
}

/// Commands turning `original` into `current`: deletes first, then creates
/// and updates in path order.
fn diff_file_map(
    original: &BTreeMap<PathBuf, String>,
    deleted_paths: &BTreeSet<PathBuf>,
    current: &BTreeMap<PathBuf, String>,
    format: bool,
) -> Vec<FileCommand> {
    let removed: BTreeSet<&PathBuf> = original
        .keys()
        .chain(deleted_paths.iter())
        .filter(|path| original.contains_key(*path) && !current.contains_key(*path))
        .collect();

    let mut commands: Vec<FileCommand> = removed
        .into_iter()
        .map(|path| FileCommand::DeleteFile {
            old_path: path.clone(),
        })
        .collect();

    for (path, new_data) in current {
        match original.get(path) {
            Some(old_data) if old_data == new_data => {}
            Some(old_data) => commands.push(FileCommand::UpdateFile {
                old_path: path.clone(),
                old_data: old_data.clone(),
                new_data: new_data.clone(),
                format,
            }),
            None => commands.push(FileCommand::CreateFile {
                new_path: path.clone(),
                new_data: new_data.clone(),
                format,
            }),
        }
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<PathBuf, String> {
        entries
            .iter()
            .map(|(path, data)| (PathBuf::from(path), data.to_string()))
            .collect()
    }

    #[test]
    fn test_diff_orders_deletes_first() {
        let original = map(&[("/code/a.ts", "a"), ("/code/b.ts", "b"), ("/code/c.ts", "c")]);
        let current = map(&[("/code/b.ts", "b2"), ("/code/c.ts", "c"), ("/code/d.ts", "d")]);
        let deleted = BTreeSet::from([PathBuf::from("/code/a.ts")]);

        let commands = diff_file_map(&original, &deleted, &current, false);

        assert_eq!(
            commands,
            vec![
                FileCommand::DeleteFile {
                    old_path: PathBuf::from("/code/a.ts")
                },
                FileCommand::UpdateFile {
                    old_path: PathBuf::from("/code/b.ts"),
                    old_data: "b".into(),
                    new_data: "b2".into(),
                    format: false,
                },
                FileCommand::CreateFile {
                    new_path: PathBuf::from("/code/d.ts"),
                    new_data: "d".into(),
                    format: false,
                },
            ]
        );
    }

    #[test]
    fn test_diff_ignores_transient_files() {
        let original = map(&[("/code/a.ts", "a")]);
        let current = map(&[("/code/a.ts", "a")]);
        let deleted = BTreeSet::from([PathBuf::from("/code/tmp.ts")]);

        assert!(diff_file_map(&original, &deleted, &current, false).is_empty());
    }

    #[test]
    fn test_deleted_then_recreated_is_update() {
        let original = map(&[("/code/a.ts", "a")]);
        let current = map(&[("/code/a.ts", "a2")]);
        let deleted = BTreeSet::from([PathBuf::from("/code/a.ts")]);

        let commands = diff_file_map(&original, &deleted, &current, true);
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], FileCommand::UpdateFile { format: true, .. }));
    }

    #[derive(Default)]
    struct Sink {
        messages: Vec<PrinterMessage>,
    }

    impl RunCallbacks for Sink {
        fn on_command(&mut self, _command: FormattedFileCommand) {}

        fn on_message(&mut self, message: PrinterMessage) {
            self.messages.push(message);
        }
    }

    #[test]
    fn test_simulated_progress_is_rescaled() {
        let mut sink = Sink::default();
        let step = CodemodDescriptor::new(crate::settings::EngineKind::Jscodeshift, "/mods/b.js")
            .with_name("second");
        let mode = StepMode::Simulate {
            index: 1,
            steps: 3,
            total: 4,
        };
        let mut callbacks = StepCallbacks::new(&mut sink, &step, mode);

        // The step's own running total is ignored in favor of the recipe's.
        callbacks.on_message(PrinterMessage::Progress {
            codemod_name: None,
            processed_file_number: 2,
            total_file_number: 2,
            processed_file_name: None,
        });
        callbacks.on_message(PrinterMessage::Finish);

        assert_eq!(
            sink.messages,
            vec![PrinterMessage::Progress {
                codemod_name: Some("second".into()),
                processed_file_number: 6,
                total_file_number: 12,
                processed_file_name: None,
            }]
        );
    }
}
