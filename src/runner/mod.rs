//! Codemod orchestration
//!
//! [`run_codemod`] is the single entry point. It dispatches on the engine
//! kind:
//!
//! - per-file engines (jscodeshift, ts-morph, ast-grep) stream matching
//!   paths into a [`WorkerPool`];
//! - filemods run once over the whole tree through a
//!   [`UnifiedFileSystem`](crate::vfs::UnifiedFileSystem) overlay;
//! - recipes run their steps in order, for real or simulated against a
//!   scratch file system (see [`recipe`]).
//!
//! Commands are handed to [`RunCallbacks::on_command`]; applying them is the
//! caller's job (or [`Runner`]'s), except inside a wet recipe where each step
//! must observe the previous step's output.

mod recipe;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::commands::{
    apply_command, build_formatted_commands, FormattedFileCommand, FormatterRegistry, PreviewRecord,
};
use crate::engines::filemod::{run_repomod, Filemod, RepomodRun};
use crate::error::{ConfigError, RunnerError};
use crate::fs::{FileSystem, FsError};
use crate::messages::{CodemodExecutionError, ConsoleKind, PrinterMessage};
use crate::patterns::{
    build_path_stream, build_patterns, collect_paths, no_files_message, non_empty, run_summary,
    GlobMatcher,
};
use crate::settings::{
    build_safe_argument_record, ArgumentRecord, CodemodDescriptor, EngineKind, FlowSettings,
    RunSettings,
};
use crate::worker::{
    FsFileLoader, ModuleCache, NativeHost, ParenthesisNormalizer, SandboxError, ScriptHost,
    SourceLoader, SourceNormalizer, WorkerPool, WorkerPoolOptions,
};

/// Outcome of one codemod, handed to [`RunCallbacks::on_success`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub codemod_name: Option<String>,
    /// Set when the codemod ran as a recipe step (or is the recipe itself).
    pub recipe_name: Option<String>,
    pub commands: Vec<FormattedFileCommand>,
}

/// Receives everything a run produces.
pub trait RunCallbacks: Send {
    fn on_command(&mut self, command: FormattedFileCommand);

    fn on_message(&mut self, message: PrinterMessage);

    fn on_error(&mut self, _error: CodemodExecutionError) {}

    fn on_success(&mut self, _result: &RunResult) {}
}

/// Script host, loaders and per-run caches shared by every step of a run.
pub struct EngineContext {
    host: Arc<dyn ScriptHost>,
    source_loader: Arc<dyn SourceLoader>,
    cache: ModuleCache,
    formatters: Arc<FormatterRegistry>,
    normalizer: Arc<dyn SourceNormalizer>,
}

impl EngineContext {
    pub fn new(host: Arc<dyn ScriptHost>, source_loader: Arc<dyn SourceLoader>) -> Self {
        Self {
            host,
            source_loader,
            cache: ModuleCache::new(),
            formatters: Arc::new(FormatterRegistry::new()),
            normalizer: Arc::new(ParenthesisNormalizer),
        }
    }

    /// Context over compiled-in transforms; the host also serves entry
    /// sources.
    pub fn native(host: NativeHost) -> Self {
        let host = Arc::new(host);
        Self::new(host.clone(), host)
    }

    pub fn with_formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = Arc::new(formatters);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn SourceNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    pub fn formatters(&self) -> &FormatterRegistry {
        &self.formatters
    }
}

/// Run `codemod` over `flow_settings.target`.
///
/// Configuration problems (unresolvable export, Piranha, bad patterns) are
/// returned as errors before any file is processed. Per-file failures are
/// reported through `callbacks` and do not fail the run.
pub fn run_codemod<'a>(
    fs: Arc<dyn FileSystem>,
    codemod: &'a CodemodDescriptor,
    flow_settings: &'a FlowSettings,
    run_settings: &'a RunSettings,
    callbacks: &'a mut dyn RunCallbacks,
    safe_arguments: &'a ArgumentRecord,
    engine: &'a EngineContext,
) -> BoxFuture<'a, Result<(), RunnerError>> {
    Box::pin(async move {
        tracing::debug!(
            codemod = %codemod.display_name(),
            engine = %codemod.engine,
            target = %flow_settings.target.display(),
            dry_run = run_settings.is_dry_run(),
            "Running codemod"
        );

        match codemod.engine {
            EngineKind::Piranha => Err(ConfigError::PiranhaUnsupported.into()),
            EngineKind::Recipe if run_settings.is_dry_run() => {
                recipe::run_dry(fs, codemod, flow_settings, run_settings, callbacks, safe_arguments, engine)
                    .await
            }
            EngineKind::Recipe => {
                recipe::run_wet(fs, codemod, flow_settings, run_settings, callbacks, safe_arguments, engine)
                    .await
            }
            EngineKind::Filemod => {
                run_filemod(fs, codemod, flow_settings, callbacks, safe_arguments, engine).await
            }
            EngineKind::Jscodeshift | EngineKind::TsMorph | EngineKind::AstGrep => {
                run_per_file(fs, codemod, flow_settings, callbacks, safe_arguments, engine).await
            }
        }
    })
}

fn resolution_error(codemod: &CodemodDescriptor, error: SandboxError) -> RunnerError {
    match error {
        SandboxError::MissingExport(detail) => ConfigError::UnresolvableExport(format!(
            "{} ({})",
            codemod.entry_path.display(),
            detail
        ))
        .into(),
        other => other.into(),
    }
}

fn no_files(callbacks: &mut dyn RunCallbacks, flow_settings: &FlowSettings) {
    tracing::info!(target = %flow_settings.target.display(), "No files matched");
    callbacks.on_message(PrinterMessage::console(
        ConsoleKind::Error,
        no_files_message(&flow_settings.target),
    ));
}

/// Forwards everything and keeps a copy of each command for the run result.
struct Collecting<'a> {
    inner: &'a mut dyn RunCallbacks,
    commands: Vec<FormattedFileCommand>,
}

impl RunCallbacks for Collecting<'_> {
    fn on_command(&mut self, command: FormattedFileCommand) {
        self.commands.push(command.clone());
        self.inner.on_command(command);
    }

    fn on_message(&mut self, message: PrinterMessage) {
        self.inner.on_message(message);
    }

    fn on_error(&mut self, error: CodemodExecutionError) {
        self.inner.on_error(error);
    }
}

async fn run_per_file(
    fs: Arc<dyn FileSystem>,
    codemod: &CodemodDescriptor,
    flow_settings: &FlowSettings,
    callbacks: &mut dyn RunCallbacks,
    safe_arguments: &ArgumentRecord,
    engine: &EngineContext,
) -> Result<(), RunnerError> {
    let source = engine.source_loader.load_source(&codemod.entry_path)?;
    let module = engine
        .cache
        .transform(&codemod.entry_path, || {
            engine.host.resolve_transform(codemod, &source)
        })
        .map_err(|e| resolution_error(codemod, e))?;

    let engine_source = (codemod.engine == EngineKind::AstGrep).then_some(source.as_str());
    let patterns = build_patterns(fs.as_ref(), flow_settings, codemod, engine_source, None)?;
    let matcher = GlobMatcher::from_patterns(&flow_settings.target, &patterns)?;

    let paths = build_path_stream(Arc::clone(&fs), flow_settings.target.clone(), matcher);
    let Some(paths) = non_empty(paths).await else {
        no_files(callbacks, flow_settings);
        return Ok(());
    };

    callbacks.on_message(PrinterMessage::console(
        ConsoleKind::Info,
        run_summary(codemod, &flow_settings.target, &patterns),
    ));

    let options = WorkerPoolOptions {
        threads: flow_settings.worker_count(),
        idle_timeout: flow_settings.idle_timeout(),
        format: flow_settings.format,
        arguments: safe_arguments.clone(),
        codemod_name: codemod.name.clone(),
        target: flow_settings.target.clone(),
    };
    let pool = WorkerPool::new(options, module, Arc::new(FsFileLoader::new(fs)))
        .with_formatters(Arc::clone(&engine.formatters))
        .with_normalizer(Arc::clone(&engine.normalizer));

    let mut collecting = Collecting {
        inner: &mut *callbacks,
        commands: Vec::new(),
    };
    pool.run(paths, &mut collecting).await?;
    let commands = collecting.commands;

    callbacks.on_success(&RunResult {
        codemod_name: codemod.name.clone(),
        recipe_name: None,
        commands,
    });
    Ok(())
}

async fn run_filemod(
    fs: Arc<dyn FileSystem>,
    codemod: &CodemodDescriptor,
    flow_settings: &FlowSettings,
    callbacks: &mut dyn RunCallbacks,
    safe_arguments: &ArgumentRecord,
    engine: &EngineContext,
) -> Result<(), RunnerError> {
    let source_loader = Arc::clone(&engine.source_loader);
    let entry_path = codemod.entry_path.clone();
    let source = tokio::task::spawn_blocking(move || source_loader.load_source(&entry_path))
        .await
        .map_err(|e| FsError::Task(e.to_string()))??;
    let filemod = engine
        .cache
        .filemod(&codemod.entry_path, || {
            engine.host.resolve_filemod(codemod, &source)
        })
        .map_err(|e| resolution_error(codemod, e))?;

    // Handlers and overlay reads are synchronous; run them off the executor
    // and replay their messages here.
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let codemod_owned = codemod.clone();
    let flow_owned = flow_settings.clone();
    let arguments = safe_arguments.clone();
    let formatters = Arc::clone(&engine.formatters);
    let task = tokio::task::spawn_blocking(move || {
        let mut forwarding = ForwardingCallbacks { sender };
        execute_filemod_run(
            fs,
            filemod.as_ref(),
            &codemod_owned,
            &flow_owned,
            &arguments,
            &formatters,
            &mut forwarding,
        )
    });

    while let Some(event) = receiver.recv().await {
        event.deliver(&mut *callbacks);
    }
    let commands = task
        .await
        .map_err(|e| SandboxError::Execution(format!("filemod task failed: {}", e)))??;

    let Some(commands) = commands else {
        return Ok(());
    };
    for command in &commands {
        callbacks.on_command(command.clone());
    }
    callbacks.on_success(&RunResult {
        codemod_name: codemod.name.clone(),
        recipe_name: None,
        commands,
    });
    Ok(())
}

/// Blocking half of [`run_filemod`]. `None` when no file matched.
fn execute_filemod_run(
    fs: Arc<dyn FileSystem>,
    filemod: &dyn Filemod,
    codemod: &CodemodDescriptor,
    flow_settings: &FlowSettings,
    safe_arguments: &ArgumentRecord,
    formatters: &FormatterRegistry,
    callbacks: &mut dyn RunCallbacks,
) -> Result<Option<Vec<FormattedFileCommand>>, RunnerError> {
    let patterns = build_patterns(
        fs.as_ref(),
        flow_settings,
        codemod,
        None,
        filemod.include_patterns(),
    )?;
    let matcher = GlobMatcher::from_patterns(&flow_settings.target, &patterns)?;
    let paths = collect_paths(fs.as_ref(), &flow_settings.target, &matcher)?;
    if paths.is_empty() {
        no_files(callbacks, flow_settings);
        return Ok(None);
    }

    callbacks.on_message(PrinterMessage::console(
        ConsoleKind::Info,
        run_summary(codemod, &flow_settings.target, &patterns),
    ));

    let run = RepomodRun {
        target: &flow_settings.target,
        paths: &paths,
        format: flow_settings.format,
        arguments: safe_arguments,
        codemod_name: codemod.name.clone(),
    };
    let commands = run_repomod(fs, filemod, &run, callbacks)?;
    Ok(Some(build_formatted_commands(formatters, commands)))
}

/// Callback traffic from a blocking task.
enum RunEvent {
    Command(FormattedFileCommand),
    Message(PrinterMessage),
    Error(CodemodExecutionError),
    Success(RunResult),
}

impl RunEvent {
    fn deliver(self, callbacks: &mut dyn RunCallbacks) {
        match self {
            RunEvent::Command(command) => callbacks.on_command(command),
            RunEvent::Message(message) => callbacks.on_message(message),
            RunEvent::Error(error) => callbacks.on_error(error),
            RunEvent::Success(result) => callbacks.on_success(&result),
        }
    }
}

struct ForwardingCallbacks {
    sender: mpsc::UnboundedSender<RunEvent>,
}

impl ForwardingCallbacks {
    fn send(&self, event: RunEvent) {
        // The receiver only goes away if the run future was dropped.
        let _ = self.sender.send(event);
    }
}

impl RunCallbacks for ForwardingCallbacks {
    fn on_command(&mut self, command: FormattedFileCommand) {
        self.send(RunEvent::Command(command));
    }

    fn on_message(&mut self, message: PrinterMessage) {
        self.send(RunEvent::Message(message));
    }

    fn on_error(&mut self, error: CodemodExecutionError) {
        self.send(RunEvent::Error(error));
    }

    fn on_success(&mut self, result: &RunResult) {
        self.send(RunEvent::Success(result.clone()));
    }
}

// ============================================================================
// Runner
// ============================================================================

/// What a [`Runner::run`] produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub commands: Vec<FormattedFileCommand>,
    /// Preview files written by a dry run.
    pub previews: Vec<PreviewRecord>,
    pub errors: Vec<CodemodExecutionError>,
    pub messages: Vec<PrinterMessage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Default)]
struct ReportCollector {
    commands: Vec<FormattedFileCommand>,
    errors: Vec<CodemodExecutionError>,
    messages: Vec<PrinterMessage>,
}

impl RunCallbacks for ReportCollector {
    fn on_command(&mut self, command: FormattedFileCommand) {
        self.commands.push(command);
    }

    fn on_message(&mut self, message: PrinterMessage) {
        self.messages.push(message);
    }

    fn on_error(&mut self, error: CodemodExecutionError) {
        self.errors.push(error);
    }
}

/// Runs codemods against one file system and applies what they produce.
pub struct Runner {
    fs: Arc<dyn FileSystem>,
    engine: EngineContext,
}

impl Runner {
    pub fn new(fs: Arc<dyn FileSystem>, engine: EngineContext) -> Self {
        Self { fs, engine }
    }

    pub fn engine(&self) -> &EngineContext {
        &self.engine
    }

    /// Sanitize `raw_arguments`, run `codemod` and apply its commands: to
    /// the target for a wet run, as previews for a dry run.
    pub async fn run(
        &self,
        codemod: &CodemodDescriptor,
        flow_settings: &FlowSettings,
        run_settings: &RunSettings,
        raw_arguments: &HashMap<String, String>,
    ) -> Result<RunReport, RunnerError> {
        let started_at = Utc::now();
        let safe_arguments = build_safe_argument_record(&codemod.arguments, raw_arguments)?;

        let mut collector = ReportCollector::default();
        run_codemod(
            Arc::clone(&self.fs),
            codemod,
            flow_settings,
            run_settings,
            &mut collector,
            &safe_arguments,
            &self.engine,
        )
        .await?;

        let mut previews = Vec::new();
        for command in &collector.commands {
            if let Some(preview) = apply_command(self.fs.as_ref(), run_settings, command)? {
                previews.push(preview);
            }
        }

        let finished_at = Utc::now();
        tracing::info!(
            codemod = %codemod.display_name(),
            commands = collector.commands.len(),
            previews = previews.len(),
            errors = collector.errors.len(),
            duration_ms = (finished_at - started_at).num_milliseconds(),
            "Codemod run complete"
        );

        Ok(RunReport {
            commands: collector.commands,
            previews,
            errors: collector.errors,
            messages: collector.messages,
            started_at,
            finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::FileCommand;
    use crate::engines::filemod::{Filemod, FilemodApi, FilemodCommand};
    use crate::fs::MemoryFileSystem;
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        commands: Vec<FormattedFileCommand>,
        messages: Vec<PrinterMessage>,
        errors: Vec<CodemodExecutionError>,
        successes: Vec<RunResult>,
    }

    impl RunCallbacks for Recorder {
        fn on_command(&mut self, command: FormattedFileCommand) {
            self.commands.push(command);
        }

        fn on_message(&mut self, message: PrinterMessage) {
            self.messages.push(message);
        }

        fn on_error(&mut self, error: CodemodExecutionError) {
            self.errors.push(error);
        }

        fn on_success(&mut self, result: &RunResult) {
            self.successes.push(result.clone());
        }
    }

    /// Renames `a.ts` to `b.ts`.
    struct RenameFilemod;

    impl Filemod for RenameFilemod {
        fn handle_file(
            &self,
            _api: &mut FilemodApi<'_>,
            path: &Path,
            _options: &ArgumentRecord,
            _state: Option<&Value>,
        ) -> Result<Vec<FilemodCommand>, String> {
            if path.file_name().map_or(false, |name| name == "a.ts") {
                return Ok(vec![FilemodCommand::MoveFile {
                    old_path: path.to_path_buf(),
                    new_path: path.with_file_name("b.ts"),
                }]);
            }
            Ok(Vec::new())
        }
    }

    fn engine() -> EngineContext {
        EngineContext::native(
            NativeHost::new()
                .with_filemod("/mods/rename.js", RenameFilemod)
                .with_transform("/mods/append.js", |file, _, _, _| {
                    Ok(Some(Value::String(format!("{}// appended\n", file.source))))
                })
                .with_transform("/mods/identity.js", |file, _, _, _| {
                    Ok(Some(Value::String(file.source.clone())))
                })
                .with_transform("/mods/rule.yml", |file, _, _, _| {
                    Ok(Some(Value::String(file.source.replace("var", "let"))))
                })
                .with_source("/mods/rule.yml", "id: no-var\nlanguage: TypeScript\n"),
        )
    }

    fn rename_and_append() -> CodemodDescriptor {
        CodemodDescriptor::recipe(
            Some("rename-and-append".into()),
            vec![
                CodemodDescriptor::new(EngineKind::Filemod, "/mods/rename.js").with_name("rename"),
                CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/append.js")
                    .with_name("append"),
            ],
        )
        .unwrap()
    }

    fn project() -> Arc<MemoryFileSystem> {
        Arc::new(MemoryFileSystem::from_files([("/code/a.ts", "const a = 1;\n")]))
    }

    fn flow() -> FlowSettings {
        FlowSettings::new("/code").with_threads(2).with_format(false)
    }

    async fn run(
        fs: Arc<MemoryFileSystem>,
        codemod: &CodemodDescriptor,
        run_settings: &RunSettings,
        engine: &EngineContext,
    ) -> (Result<(), RunnerError>, Recorder) {
        let mut recorder = Recorder::default();
        let result = run_codemod(
            fs,
            codemod,
            &flow(),
            run_settings,
            &mut recorder,
            &ArgumentRecord::new(),
            engine,
        )
        .await;
        (result, recorder)
    }

    #[tokio::test]
    async fn test_dry_recipe_rename_and_append() {
        let fs = project();
        let before = fs.files();

        let (result, recorder) = run(
            Arc::clone(&fs),
            &rename_and_append(),
            &RunSettings::dry("/previews"),
            &engine(),
        )
        .await;
        result.unwrap();

        let commands: Vec<FileCommand> = recorder
            .commands
            .into_iter()
            .map(FormattedFileCommand::into_command)
            .collect();
        assert_eq!(
            commands,
            vec![
                FileCommand::DeleteFile {
                    old_path: PathBuf::from("/code/a.ts")
                },
                FileCommand::CreateFile {
                    new_path: PathBuf::from("/code/b.ts"),
                    new_data: "const a = 1;\n// appended\n".into(),
                    format: false,
                },
            ]
        );
        assert_eq!(fs.files(), before);
        assert_eq!(
            recorder
                .messages
                .iter()
                .filter(|m| matches!(m, PrinterMessage::Finish))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_dry_recipe_is_idempotent() {
        let engine = engine();
        let fs = project();

        let (first, first_recorder) =
            run(Arc::clone(&fs), &rename_and_append(), &RunSettings::dry("/previews"), &engine)
                .await;
        let (second, second_recorder) =
            run(Arc::clone(&fs), &rename_and_append(), &RunSettings::dry("/previews"), &engine)
                .await;

        first.unwrap();
        second.unwrap();
        assert_eq!(first_recorder.commands, second_recorder.commands);
    }

    #[tokio::test]
    async fn test_dry_run_matches_wet_run() {
        let engine = engine();
        let previewed = project();
        let applied = project();

        let (result, recorder) = run(
            Arc::clone(&previewed),
            &rename_and_append(),
            &RunSettings::dry("/previews"),
            &engine,
        )
        .await;
        result.unwrap();
        let wet = RunSettings::wet();
        for command in &recorder.commands {
            apply_command(previewed.as_ref(), &wet, command).unwrap();
        }

        let (result, recorder) =
            run(Arc::clone(&applied), &rename_and_append(), &wet, &engine).await;
        result.unwrap();

        assert!(recorder.commands.is_empty());
        assert_eq!(previewed.files(), applied.files());
        assert_eq!(
            applied.files().get(Path::new("/code/b.ts")).map(String::as_str),
            Some("const a = 1;\n// appended\n")
        );
        let names: Vec<_> = recorder
            .successes
            .iter()
            .map(|s| s.codemod_name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["rename", "append", "rename-and-append"]);
    }

    #[tokio::test]
    async fn test_identity_transform_over_many_files() {
        let fs = Arc::new(MemoryFileSystem::from_files(
            (0..25).map(|i| (format!("/code/src/file{}.ts", i), format!("export const v = {};\n", i))),
        ));
        let codemod = CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/identity.js");

        let (result, recorder) = run(fs, &codemod, &RunSettings::wet(), &engine()).await;
        result.unwrap();

        assert!(recorder.commands.is_empty());
        let finishes = recorder
            .messages
            .iter()
            .filter(|m| matches!(m, PrinterMessage::Finish))
            .count();
        assert_eq!(finishes, 1);
        let last_total = recorder.messages.iter().rev().find_map(|m| match m {
            PrinterMessage::Progress {
                total_file_number, ..
            } => Some(*total_file_number),
            _ => None,
        });
        assert_eq!(last_total, Some(25));
    }

    #[tokio::test]
    async fn test_hung_transform_does_not_hang_run() {
        let engine = EngineContext::native(NativeHost::new().with_transform(
            "/mods/hang.js",
            |file, _, _, _| {
                if file.path.ends_with("a.ts") {
                    std::thread::sleep(Duration::from_secs(30));
                }
                Ok(None)
            },
        ));
        let codemod = CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/hang.js");
        let flow = flow().with_idle_timeout(Duration::from_millis(300));
        let mut recorder = Recorder::default();

        let started = std::time::Instant::now();
        run_codemod(
            project(),
            &codemod,
            &flow,
            &RunSettings::wet(),
            &mut recorder,
            &ArgumentRecord::new(),
            &engine,
        )
        .await
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(recorder
            .messages
            .iter()
            .any(|m| matches!(m, PrinterMessage::Finish)));
    }

    #[tokio::test]
    async fn test_piranha_is_rejected() {
        let codemod = CodemodDescriptor::new(EngineKind::Piranha, "/mods/rules.toml");
        let (result, recorder) = run(project(), &codemod, &RunSettings::wet(), &engine()).await;

        let err = result.unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("Piranha not supported"));
        assert!(recorder.messages.is_empty());
    }

    #[test]
    fn test_nested_recipe_is_rejected() {
        let json = r#"{
            "name": "outer",
            "engine": "recipe",
            "entryPath": "",
            "codemods": [
                { "name": "inner", "engine": "recipe", "entryPath": "", "codemods": [] }
            ]
        }"#;
        assert!(CodemodDescriptor::from_json(json).is_err());

        let inner = CodemodDescriptor::recipe(Some("inner".into()), Vec::new()).unwrap();
        assert!(matches!(
            CodemodDescriptor::recipe(Some("outer".into()), vec![inner]),
            Err(ConfigError::NestedRecipe { .. })
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_export_is_config_error() {
        let codemod = CodemodDescriptor::new(EngineKind::TsMorph, "/mods/missing.ts");
        let (result, recorder) = run(project(), &codemod, &RunSettings::wet(), &engine()).await;

        assert!(matches!(
            result,
            Err(RunnerError::Config(ConfigError::UnresolvableExport(_)))
        ));
        assert!(recorder.messages.is_empty());
    }

    #[tokio::test]
    async fn test_no_files_notice() {
        let fs = Arc::new(MemoryFileSystem::from_files([("/code/readme.md", "# hi")]));
        let codemod = CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/append.js");

        let (result, recorder) = run(fs, &codemod, &RunSettings::wet(), &engine()).await;
        result.unwrap();

        assert!(recorder.commands.is_empty());
        assert!(recorder.messages.iter().any(|m| matches!(
            m,
            PrinterMessage::Console { console_kind: ConsoleKind::Error, message }
                if message.contains("No files to process")
        )));
    }

    #[tokio::test]
    async fn test_ast_grep_uses_rule_language() {
        let fs = Arc::new(MemoryFileSystem::from_files([
            ("/code/a.ts", "var a = 1;"),
            ("/code/b.js", "var b = 1;"),
        ]));
        let codemod = CodemodDescriptor::new(EngineKind::AstGrep, "/mods/rule.yml");

        let (result, recorder) = run(fs, &codemod, &RunSettings::wet(), &engine()).await;
        result.unwrap();

        assert_eq!(recorder.commands.len(), 1);
        assert_eq!(
            recorder.commands[0].command().primary_path(),
            Path::new("/code/a.ts")
        );
    }

    #[tokio::test]
    async fn test_runner_dry_run_writes_previews_only() {
        let fs = project();
        let runner = Runner::new(fs.clone(), engine());
        let codemod = CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/append.js");

        let report = runner
            .run(&codemod, &flow(), &RunSettings::dry("/previews"), &HashMap::new())
            .await
            .unwrap();

        assert_eq!(report.commands.len(), 1);
        assert_eq!(report.previews.len(), 1);
        let files = fs.files();
        assert_eq!(
            files.get(Path::new("/code/a.ts")).map(String::as_str),
            Some("const a = 1;\n")
        );
        assert_eq!(
            files.get(&report.previews[0].preview_path).map(String::as_str),
            Some("const a = 1;\n// appended\n")
        );
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn test_runner_wet_run_applies_commands() {
        let fs = project();
        let runner = Runner::new(fs.clone(), engine());
        let codemod = CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/append.js");

        let report = runner
            .run(&codemod, &flow(), &RunSettings::wet(), &HashMap::new())
            .await
            .unwrap();

        assert!(report.previews.is_empty());
        assert!(report.errors.is_empty());
        assert_eq!(
            fs.files().get(Path::new("/code/a.ts")).map(String::as_str),
            Some("const a = 1;\n// appended\n")
        );
    }

    #[tokio::test]
    async fn test_module_cache_shared_across_steps() {
        let engine = engine();
        let recipe = CodemodDescriptor::recipe(
            None,
            vec![
                CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/identity.js"),
                CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/identity.js"),
            ],
        )
        .unwrap();

        let (result, _) = run(project(), &recipe, &RunSettings::wet(), &engine).await;
        result.unwrap();

        assert_eq!(engine.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_recipe_progress_spans_all_steps() {
        let fs = Arc::new(MemoryFileSystem::from_files(
            (0..10).map(|i| (format!("/code/f{}.ts", i), "const a = 1;\n".to_string())),
        ));
        let recipe = CodemodDescriptor::recipe(
            None,
            vec![
                CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/identity.js"),
                CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/identity.js"),
            ],
        )
        .unwrap();

        let mut recorder = Recorder::default();
        run_codemod(
            fs,
            &recipe,
            &flow().with_threads(1),
            &RunSettings::dry("/previews"),
            &mut recorder,
            &ArgumentRecord::new(),
            &engine(),
        )
        .await
        .unwrap();

        let progress: Vec<(usize, usize)> = recorder
            .messages
            .iter()
            .filter_map(|m| match m {
                PrinterMessage::Progress {
                    processed_file_number,
                    total_file_number,
                    ..
                } => Some((*processed_file_number, *total_file_number)),
                _ => None,
            })
            .collect();
        let expected: Vec<(usize, usize)> = (1..=20).map(|n| (n, 20)).collect();
        assert_eq!(progress, expected);
    }

    /// Blocks in `handle_file` until the test's async task opens the gate.
    struct GatedFilemod {
        gate: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl Filemod for GatedFilemod {
        fn handle_file(
            &self,
            _api: &mut FilemodApi<'_>,
            path: &Path,
            _options: &ArgumentRecord,
            _state: Option<&Value>,
        ) -> Result<Vec<FilemodCommand>, String> {
            let gate = self.gate.lock().map_err(|e| e.to_string())?;
            gate.recv_timeout(Duration::from_secs(5))
                .map_err(|_| "executor starved".to_string())?;
            Ok(vec![FilemodCommand::UpsertData {
                path: path.to_path_buf(),
                data: "opened".into(),
            }])
        }
    }

    #[tokio::test]
    async fn test_filemod_handlers_leave_executor_free() {
        let (open, gate) = std::sync::mpsc::channel();
        let engine = EngineContext::native(NativeHost::new().with_filemod(
            "/mods/gated.js",
            GatedFilemod {
                gate: std::sync::Mutex::new(gate),
            },
        ));
        let codemod = CodemodDescriptor::new(EngineKind::Filemod, "/mods/gated.js");

        // Single-threaded runtime: this only runs if the handler is off the
        // executor thread.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = open.send(());
        });

        let (result, recorder) = run(project(), &codemod, &RunSettings::wet(), &engine).await;
        result.unwrap();

        assert!(recorder.errors.is_empty(), "{:?}", recorder.errors);
        assert_eq!(recorder.commands.len(), 1);
        assert_eq!(recorder.successes.len(), 1);
        assert!(recorder
            .messages
            .iter()
            .any(|m| matches!(m, PrinterMessage::Progress { .. })));
    }
}
