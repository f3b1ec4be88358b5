//! Whole-tree codemods ("filemods").
//!
//! A filemod walks the tree through a small command language instead of
//! transforming one file at a time:
//!
//! ```text
//! initialize_state
//!   -> handle_directory / handle_file   (emit more commands)
//!   -> handle_data                      (per upserted file)
//! handle_finish -> noop | restart
//! ```
//!
//! All reads and writes go through one [`UnifiedFileSystem`], so later
//! handlers observe earlier changes. On `restart` the whole lifecycle runs
//! again against the same overlay, carrying the state forward.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::FileCommand;
use crate::fs::{EntryKind, FileSystem};
use crate::messages::{CodemodExecutionError, PrinterMessage};
use crate::patterns::GlobMatcher;
use crate::runner::RunCallbacks;
use crate::settings::ArgumentRecord;
use crate::vfs::{PathHashDigest, UnifiedFileSystem, VfsError};
use crate::worker::SandboxError;

/// Restarts beyond this are treated as a runaway filemod.
const MAX_RESTARTS: usize = 64;

/// A command produced by a filemod handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilemodCommand {
    HandleDirectory { path: PathBuf },
    HandleFile { path: PathBuf },
    /// Read the file and pass its content to `handle_data`.
    UpsertFile { path: PathBuf },
    DeleteFile { path: PathBuf },
    #[serde(rename_all = "camelCase")]
    MoveFile { old_path: PathBuf, new_path: PathBuf },
    UpsertData { path: PathBuf, data: String },
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinishCommand {
    Noop,
    Restart,
}

/// Read access to the overlay for filemod handlers.
pub struct FilemodApi<'a> {
    vfs: &'a mut UnifiedFileSystem,
    root: &'a Path,
}

impl<'a> FilemodApi<'a> {
    pub fn new(vfs: &'a mut UnifiedFileSystem, root: &'a Path) -> Self {
        Self { vfs, root }
    }

    /// The target directory of the run.
    pub fn root(&self) -> &Path {
        self.root
    }

    pub fn read_directory(&mut self, path: &Path) -> Vec<PathBuf> {
        self.vfs.read_directory(path)
    }

    pub fn read_file(&self, path: &Path) -> Result<String, VfsError> {
        self.vfs.read_file(path)
    }

    pub fn is_directory(&mut self, path: &Path) -> bool {
        self.vfs.is_directory(path)
    }

    pub fn exists(&mut self, path: &Path) -> bool {
        self.vfs.exists(path)
    }

    /// Files below the root matching `include` and not `exclude`.
    pub fn get_file_paths(
        &mut self,
        include: &[String],
        exclude: &[String],
    ) -> Result<Vec<PathBuf>, String> {
        let matcher = GlobMatcher::new(self.root, include, exclude).map_err(|e| e.to_string())?;
        self.vfs
            .get_file_paths(self.root, &matcher)
            .map_err(|e| e.to_string())
    }
}

/// A whole-tree codemod.
///
/// Every hook has a default: directories are listed recursively (only when
/// the filemod declares no include patterns), files are upserted, data is
/// left alone and the run finishes after one pass. Handler errors are
/// reported against the path being handled and do not stop the run.
pub trait Filemod: Send + Sync {
    fn include_patterns(&self) -> Option<&[String]> {
        None
    }

    fn exclude_patterns(&self) -> &[String] {
        &[]
    }

    /// Build the state for this pass from the previous pass's state.
    fn initialize_state(
        &self,
        _api: &mut FilemodApi<'_>,
        _options: &ArgumentRecord,
        previous: Option<Value>,
        _paths: Option<&[PathBuf]>,
    ) -> Result<Option<Value>, String> {
        Ok(previous)
    }

    /// `None` means "no directory handler": the default listing is used
    /// when the filemod has no include patterns, otherwise nothing happens.
    fn handle_directory(
        &self,
        _api: &mut FilemodApi<'_>,
        _path: &Path,
        _options: &ArgumentRecord,
        _state: Option<&Value>,
    ) -> Option<Result<Vec<FilemodCommand>, String>> {
        None
    }

    fn handle_file(
        &self,
        _api: &mut FilemodApi<'_>,
        path: &Path,
        _options: &ArgumentRecord,
        _state: Option<&Value>,
    ) -> Result<Vec<FilemodCommand>, String> {
        Ok(vec![FilemodCommand::UpsertFile {
            path: path.to_path_buf(),
        }])
    }

    fn handle_data(
        &self,
        _api: &mut FilemodApi<'_>,
        _path: &Path,
        _data: &str,
        _options: &ArgumentRecord,
        _state: Option<&Value>,
    ) -> Result<FilemodCommand, String> {
        Ok(FilemodCommand::Noop)
    }

    fn handle_finish(
        &self,
        _options: &ArgumentRecord,
        _state: Option<&Value>,
    ) -> Result<FinishCommand, String> {
        Ok(FinishCommand::Noop)
    }
}

/// Receives lifecycle events from [`execute_filemod`].
pub trait FilemodObserver {
    /// A `handleFile` command finished (successfully or not).
    fn on_file_handled(&mut self, _path: &Path) {}

    fn on_error(&mut self, _path: &Path, _message: String) {}
}

/// Drive `filemod` over `root` until it finishes without a restart.
///
/// `paths` overrides the filemod's own include patterns with an explicit
/// file list. Changes stay in `vfs`; call
/// [`UnifiedFileSystem::build_external_commands`] afterwards.
pub fn execute_filemod(
    vfs: &mut UnifiedFileSystem,
    filemod: &dyn Filemod,
    root: &Path,
    paths: Option<&[PathBuf]>,
    options: &ArgumentRecord,
    observer: &mut dyn FilemodObserver,
) -> Result<(), SandboxError> {
    let mut state: Option<Value> = None;

    for pass in 0..=MAX_RESTARTS {
        let Some(entry) = vfs.upsert_entry(root) else {
            tracing::debug!(root = %root.display(), "Filemod root does not exist");
            return Ok(());
        };

        let paths = resolve_paths(vfs, filemod, root, paths)?;

        state = {
            let mut api = FilemodApi::new(vfs, root);
            filemod
                .initialize_state(&mut api, options, state, paths.as_deref())
                .map_err(SandboxError::Execution)?
        };

        let mut driver = Driver {
            vfs: &mut *vfs,
            filemod,
            root,
            options,
            state: state.as_ref(),
            observer: &mut *observer,
        };

        match &paths {
            Some(paths) => {
                for path in paths {
                    driver.handle(FilemodCommand::HandleFile { path: path.clone() });
                }
            }
            None => {
                let command = match entry.kind {
                    EntryKind::Directory => FilemodCommand::HandleDirectory {
                        path: root.to_path_buf(),
                    },
                    EntryKind::File => FilemodCommand::HandleFile {
                        path: root.to_path_buf(),
                    },
                };
                driver.handle(command);
            }
        }

        match filemod
            .handle_finish(options, state.as_ref())
            .map_err(SandboxError::Execution)?
        {
            FinishCommand::Noop => return Ok(()),
            FinishCommand::Restart => {
                tracing::debug!(pass, "Filemod requested a restart");
            }
        }
    }

    Err(SandboxError::Execution(format!(
        "filemod restarted more than {} times",
        MAX_RESTARTS
    )))
}

fn resolve_paths(
    vfs: &mut UnifiedFileSystem,
    filemod: &dyn Filemod,
    root: &Path,
    paths: Option<&[PathBuf]>,
) -> Result<Option<Vec<PathBuf>>, SandboxError> {
    if let Some(paths) = paths {
        vfs.register_files(paths);
        return Ok(Some(paths.to_vec()));
    }

    match filemod.include_patterns() {
        Some(include) if !include.is_empty() => {
            let matcher = GlobMatcher::new(root, include, filemod.exclude_patterns())
                .map_err(|e| SandboxError::Execution(e.to_string()))?;
            let paths = vfs
                .get_file_paths(root, &matcher)
                .map_err(|e| SandboxError::Execution(e.to_string()))?;
            Ok(Some(paths))
        }
        _ => Ok(None),
    }
}

struct Driver<'a, 'o> {
    vfs: &'a mut UnifiedFileSystem,
    filemod: &'a dyn Filemod,
    root: &'a Path,
    options: &'a ArgumentRecord,
    state: Option<&'a Value>,
    observer: &'o mut dyn FilemodObserver,
}

impl Driver<'_, '_> {
    fn api(&mut self) -> FilemodApi<'_> {
        FilemodApi::new(self.vfs, self.root)
    }

    fn handle(&mut self, command: FilemodCommand) {
        match command {
            FilemodCommand::HandleDirectory { path } => self.handle_directory(&path),
            FilemodCommand::HandleFile { path } => self.handle_file(&path),
            FilemodCommand::UpsertFile { path } => self.upsert_file(&path),
            FilemodCommand::DeleteFile { path } => self.vfs.delete_file(&path),
            FilemodCommand::MoveFile { old_path, new_path } => {
                if let Err(e) = self.vfs.move_file(&old_path, &new_path) {
                    self.observer.on_error(&old_path, e.to_string());
                }
            }
            FilemodCommand::UpsertData { path, data } => self.vfs.upsert_data(&path, data),
            FilemodCommand::Noop => {}
        }
    }

    fn handle_directory(&mut self, path: &Path) {
        if self.vfs.upsert_directory(path).is_none() {
            return;
        }

        let (filemod, options, state) = (self.filemod, self.options, self.state);
        let handled = filemod.handle_directory(&mut self.api(), path, options, state);
        let result = match handled {
            Some(result) => result,
            None if filemod.include_patterns().is_none() => Ok(self.default_directory_commands(path)),
            None => return,
        };

        match result {
            Ok(commands) => commands.into_iter().for_each(|command| self.handle(command)),
            Err(message) => self.observer.on_error(path, message),
        }
    }

    fn default_directory_commands(&mut self, path: &Path) -> Vec<FilemodCommand> {
        self.vfs
            .read_directory(path)
            .into_iter()
            .map(|child| {
                if self.vfs.is_directory(&child) {
                    FilemodCommand::HandleDirectory { path: child }
                } else {
                    FilemodCommand::HandleFile { path: child }
                }
            })
            .collect()
    }

    fn handle_file(&mut self, path: &Path) {
        if self.vfs.upsert_file(path).is_none() {
            return;
        }

        let (filemod, options, state) = (self.filemod, self.options, self.state);
        let result = filemod.handle_file(&mut self.api(), path, options, state);
        match result {
            Ok(commands) => commands.into_iter().for_each(|command| self.handle(command)),
            Err(message) => self.observer.on_error(path, message),
        }
        self.observer.on_file_handled(path);
    }

    fn upsert_file(&mut self, path: &Path) {
        let data = match self.vfs.read_file(path) {
            Ok(data) => data,
            Err(e) => {
                self.observer.on_error(path, e.to_string());
                return;
            }
        };

        let (filemod, options, state) = (self.filemod, self.options, self.state);
        let result = filemod.handle_data(&mut self.api(), path, &data, options, state);
        match result {
            Ok(command) => self.handle(command),
            Err(message) => self.observer.on_error(path, message),
        }
    }
}

/// Reports filemod progress and errors to the run callbacks.
struct CallbackObserver<'a> {
    callbacks: &'a mut dyn RunCallbacks,
    codemod_name: Option<String>,
    handled: HashSet<PathHashDigest>,
    total: usize,
}

impl FilemodObserver for CallbackObserver<'_> {
    fn on_file_handled(&mut self, path: &Path) {
        self.handled.insert(PathHashDigest::of(path));
        self.total = self.total.max(self.handled.len());

        self.callbacks.on_message(PrinterMessage::Progress {
            codemod_name: self.codemod_name.clone(),
            processed_file_number: self.handled.len(),
            total_file_number: self.total,
            processed_file_name: Some(path.to_path_buf()),
        });
    }

    fn on_error(&mut self, path: &Path, message: String) {
        tracing::debug!(path = %path.display(), error = %message, "Filemod handler failed");
        self.callbacks.on_message(PrinterMessage::Error {
            path: Some(path.to_path_buf()),
            message: message.clone(),
        });
        self.callbacks.on_error(CodemodExecutionError {
            codemod_name: self.codemod_name.clone().unwrap_or_default(),
            file_path: path.to_path_buf(),
            message,
        });
    }
}

/// One filemod invocation over an explicit file list.
pub struct RepomodRun<'a> {
    pub target: &'a Path,
    pub paths: &'a [PathBuf],
    pub format: bool,
    pub arguments: &'a ArgumentRecord,
    pub codemod_name: Option<String>,
}

/// Run `filemod` against `fs` and convert the overlay into file commands.
///
/// Upserts become updates when the path existed before the run and creates
/// otherwise; deletes of pre-existing files become deletes.
pub fn run_repomod(
    fs: Arc<dyn FileSystem>,
    filemod: &dyn Filemod,
    run: &RepomodRun<'_>,
    callbacks: &mut dyn RunCallbacks,
) -> Result<Vec<FileCommand>, SandboxError> {
    let mut vfs = UnifiedFileSystem::new(fs);
    let mut observer = CallbackObserver {
        callbacks,
        codemod_name: run.codemod_name.clone(),
        handled: HashSet::new(),
        total: run.paths.len(),
    };

    execute_filemod(
        &mut vfs,
        filemod,
        run.target,
        Some(run.paths),
        run.arguments,
        &mut observer,
    )?;

    let commands = vfs.build_external_commands(run.format);
    tracing::info!(
        files = observer.handled.len(),
        commands = commands.len(),
        "Filemod finished"
    );
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::FormattedFileCommand;
    use crate::fs::MemoryFileSystem;
    use crate::runner::RunResult;

    #[derive(Default)]
    struct Recorder {
        handled: Vec<PathBuf>,
        errors: Vec<(PathBuf, String)>,
    }

    impl FilemodObserver for Recorder {
        fn on_file_handled(&mut self, path: &Path) {
            self.handled.push(path.to_path_buf());
        }

        fn on_error(&mut self, path: &Path, message: String) {
            self.errors.push((path.to_path_buf(), message));
        }
    }

    fn tree() -> Arc<dyn FileSystem> {
        Arc::new(MemoryFileSystem::from_files([
            ("/code/a.ts", "a"),
            ("/code/src/b.ts", "b"),
            ("/code/src/c.md", "c"),
        ]))
    }

    /// Appends a marker to every `.ts` file.
    struct AppendMarker;

    impl Filemod for AppendMarker {
        fn handle_data(
            &self,
            _api: &mut FilemodApi<'_>,
            path: &Path,
            data: &str,
            _options: &ArgumentRecord,
            _state: Option<&Value>,
        ) -> Result<FilemodCommand, String> {
            if path.extension().map_or(false, |ext| ext == "ts") {
                Ok(FilemodCommand::UpsertData {
                    path: path.to_path_buf(),
                    data: format!("{}!", data),
                })
            } else {
                Ok(FilemodCommand::Noop)
            }
        }
    }

    #[test]
    fn test_default_directory_walk() {
        let mut vfs = UnifiedFileSystem::new(tree());
        let mut recorder = Recorder::default();

        execute_filemod(
            &mut vfs,
            &AppendMarker,
            Path::new("/code"),
            None,
            &ArgumentRecord::new(),
            &mut recorder,
        )
        .unwrap();

        assert_eq!(recorder.handled.len(), 3);
        let commands = vfs.build_external_commands(false);
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| matches!(
            c,
            FileCommand::UpdateFile { new_data, .. } if new_data.ends_with('!')
        )));
    }

    struct RenameToJs {
        include: Vec<String>,
    }

    impl Filemod for RenameToJs {
        fn include_patterns(&self) -> Option<&[String]> {
            Some(&self.include)
        }

        fn handle_file(
            &self,
            _api: &mut FilemodApi<'_>,
            path: &Path,
            _options: &ArgumentRecord,
            _state: Option<&Value>,
        ) -> Result<Vec<FilemodCommand>, String> {
            Ok(vec![FilemodCommand::MoveFile {
                old_path: path.to_path_buf(),
                new_path: path.with_extension("js"),
            }])
        }
    }

    #[test]
    fn test_include_patterns_and_move() {
        let mut vfs = UnifiedFileSystem::new(tree());
        let mut recorder = Recorder::default();
        let filemod = RenameToJs {
            include: vec!["**/*.ts".to_string()],
        };

        execute_filemod(
            &mut vfs,
            &filemod,
            Path::new("/code"),
            None,
            &ArgumentRecord::new(),
            &mut recorder,
        )
        .unwrap();

        let commands = vfs.build_external_commands(false);
        let deletes = commands
            .iter()
            .filter(|c| matches!(c, FileCommand::DeleteFile { .. }))
            .count();
        let creates: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                FileCommand::CreateFile { new_path, .. } => Some(new_path.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deletes, 2);
        assert!(creates.contains(&PathBuf::from("/code/a.js")));
        assert!(creates.contains(&PathBuf::from("/code/src/b.js")));
    }

    /// Counts passes in its state and restarts once.
    struct RestartOnce;

    impl Filemod for RestartOnce {
        fn initialize_state(
            &self,
            _api: &mut FilemodApi<'_>,
            _options: &ArgumentRecord,
            previous: Option<Value>,
            _paths: Option<&[PathBuf]>,
        ) -> Result<Option<Value>, String> {
            let pass = previous.and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(Some(Value::from(pass + 1)))
        }

        fn handle_data(
            &self,
            _api: &mut FilemodApi<'_>,
            path: &Path,
            data: &str,
            _options: &ArgumentRecord,
            state: Option<&Value>,
        ) -> Result<FilemodCommand, String> {
            let pass = state.and_then(Value::as_u64).unwrap_or(0);
            Ok(FilemodCommand::UpsertData {
                path: path.to_path_buf(),
                data: format!("{}{}", data, pass),
            })
        }

        fn handle_finish(
            &self,
            _options: &ArgumentRecord,
            state: Option<&Value>,
        ) -> Result<FinishCommand, String> {
            match state.and_then(Value::as_u64) {
                Some(1) => Ok(FinishCommand::Restart),
                _ => Ok(FinishCommand::Noop),
            }
        }
    }

    #[test]
    fn test_restart_carries_state_and_overlay() {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::from_files([("/code/a.ts", "a")]));
        let mut vfs = UnifiedFileSystem::new(fs);
        let mut recorder = Recorder::default();

        execute_filemod(
            &mut vfs,
            &RestartOnce,
            Path::new("/code"),
            None,
            &ArgumentRecord::new(),
            &mut recorder,
        )
        .unwrap();

        assert_eq!(vfs.read_file(Path::new("/code/a.ts")).unwrap(), "a12");
        assert_eq!(recorder.handled.len(), 2);
    }

    struct FailingFile;

    impl Filemod for FailingFile {
        fn handle_file(
            &self,
            _api: &mut FilemodApi<'_>,
            path: &Path,
            _options: &ArgumentRecord,
            _state: Option<&Value>,
        ) -> Result<Vec<FilemodCommand>, String> {
            if path.ends_with("a.ts") {
                return Err("cannot handle".to_string());
            }
            Ok(vec![FilemodCommand::DeleteFile {
                path: path.to_path_buf(),
            }])
        }
    }

    #[test]
    fn test_handler_errors_are_per_path() {
        let mut vfs = UnifiedFileSystem::new(tree());
        let mut recorder = Recorder::default();

        execute_filemod(
            &mut vfs,
            &FailingFile,
            Path::new("/code"),
            None,
            &ArgumentRecord::new(),
            &mut recorder,
        )
        .unwrap();

        assert_eq!(recorder.errors.len(), 1);
        assert_eq!(recorder.errors[0].0, PathBuf::from("/code/a.ts"));
        assert_eq!(vfs.build_external_commands(false).len(), 2);
    }

    #[derive(Default)]
    struct Callbacks {
        messages: Vec<PrinterMessage>,
        errors: Vec<CodemodExecutionError>,
    }

    impl RunCallbacks for Callbacks {
        fn on_command(&mut self, _command: FormattedFileCommand) {}

        fn on_message(&mut self, message: PrinterMessage) {
            self.messages.push(message);
        }

        fn on_error(&mut self, error: CodemodExecutionError) {
            self.errors.push(error);
        }

        fn on_success(&mut self, _result: &RunResult) {}
    }

    #[test]
    fn test_run_repomod_reports_progress() {
        let paths = vec![PathBuf::from("/code/a.ts"), PathBuf::from("/code/src/b.ts")];
        let arguments = ArgumentRecord::new();
        let run = RepomodRun {
            target: Path::new("/code"),
            paths: &paths,
            format: true,
            arguments: &arguments,
            codemod_name: Some("marker".into()),
        };
        let mut callbacks = Callbacks::default();

        let commands = run_repomod(tree(), &AppendMarker, &run, &mut callbacks).unwrap();

        assert_eq!(commands.len(), 2);
        assert!(commands
            .iter()
            .all(|c| matches!(c, FileCommand::UpdateFile { format: true, .. })));
        let last = callbacks.messages.last().unwrap();
        assert!(matches!(
            last,
            PrinterMessage::Progress {
                processed_file_number: 2,
                total_file_number: 2,
                ..
            }
        ));
        assert!(callbacks.errors.is_empty());
    }
}
