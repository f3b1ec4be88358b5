//! Worker Pool
//!
//! Runs one transform against a lazy stream of paths with N isolated
//! workers. Scheduling is greedy: a path is pulled from the stream only when
//! a worker is idle, so the directory walk never runs ahead of execution by
//! more than the stream's buffer.
//!
//! Each worker owns one [`ExecutionContext`] on a dedicated OS thread. The
//! coordinator (this task) is the only place that touches callbacks, so
//! command and message emission needs no locking.
//!
//! If no worker reports anything for the idle timeout, the pool kills what it
//! can, abandons the rest, emits `finish` and returns what it has.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::time::Instant;

use super::noop::{ParenthesisNormalizer, SourceNormalizer};
use super::sandbox::{run_file, FileRun};
use super::{
    Console, ExecutionContext, FileInfo, FileLoader, KillSwitch, SandboxError, TransformModule,
};
use crate::commands::{build_formatted_commands, FormatterRegistry, FormattedFileCommand};
use crate::config::DEFAULT_IDLE_TIMEOUT;
use crate::error::RunnerError;
use crate::messages::{CodemodExecutionError, ConsoleKind, PrinterMessage};
use crate::patterns::PathStream;
use crate::runner::RunCallbacks;
use crate::settings::{ArgumentRecord, EngineKind};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolOptions {
    pub threads: usize,
    pub idle_timeout: Duration,
    pub format: bool,
    pub arguments: ArgumentRecord,
    pub codemod_name: Option<String>,
    /// Progress reports file names relative to this directory.
    pub target: PathBuf,
}

impl WorkerPoolOptions {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            threads: num_cpus::get().max(1),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            format: false,
            arguments: ArgumentRecord::new(),
            codemod_name: None,
            target: target.into(),
        }
    }
}

/// Summary of one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolReport {
    /// Paths pulled from the stream
    pub total_files: usize,
    /// Paths that produced a result or an error
    pub processed_files: usize,
    pub failed_files: usize,
    pub commands: usize,
    /// Whether the idle timeout ended the run
    pub timed_out: bool,
}

enum Job {
    Run { path: PathBuf, source: String },
    Shutdown,
}

enum WorkerEvent {
    Console {
        kind: ConsoleKind,
        message: String,
    },
    Done {
        worker: usize,
        path: PathBuf,
        result: Result<Vec<FormattedFileCommand>, SandboxError>,
    },
}

struct WorkerHandle {
    jobs: std_mpsc::Sender<Job>,
    kill_switch: Option<Arc<dyn KillSwitch>>,
}

/// Per-run settings every worker thread reads.
struct WorkerShared {
    engine: EngineKind,
    format: bool,
    arguments: ArgumentRecord,
    formatters: Arc<FormatterRegistry>,
    normalizer: Arc<dyn SourceNormalizer>,
}

/// Executes a transform module over many files.
pub struct WorkerPool {
    options: WorkerPoolOptions,
    module: Arc<dyn TransformModule>,
    loader: Arc<dyn FileLoader>,
    formatters: Arc<FormatterRegistry>,
    normalizer: Arc<dyn SourceNormalizer>,
}

impl WorkerPool {
    pub fn new(
        options: WorkerPoolOptions,
        module: Arc<dyn TransformModule>,
        loader: Arc<dyn FileLoader>,
    ) -> Self {
        Self {
            options,
            module,
            loader,
            formatters: Arc::new(FormatterRegistry::new()),
            normalizer: Arc::new(ParenthesisNormalizer),
        }
    }

    pub fn with_formatters(mut self, formatters: Arc<FormatterRegistry>) -> Self {
        self.formatters = formatters;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn SourceNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Run every path of `paths` through the transform.
    ///
    /// Commands and messages are delivered to `callbacks` as workers report.
    /// Exactly one [`PrinterMessage::Finish`] is emitted at the end. Errors
    /// are returned only when workers cannot be started.
    pub async fn run(
        self,
        mut paths: PathStream,
        callbacks: &mut dyn RunCallbacks,
    ) -> Result<PoolReport, RunnerError> {
        let worker_count = self.options.threads.max(1);
        let idle_timeout = self.options.idle_timeout;
        let (event_tx, mut event_rx) = unbounded_channel();

        let shared = Arc::new(WorkerShared {
            engine: self.module.engine(),
            format: self.options.format,
            arguments: self.options.arguments.clone(),
            formatters: Arc::clone(&self.formatters),
            normalizer: Arc::clone(&self.normalizer),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let context = self.module.spawn_context()?;
            let handle = spawn_worker(id, context, Arc::clone(&shared), event_tx.clone())
                .map_err(RunnerError::WorkerSpawn)?;
            workers.push(handle);
        }
        drop(event_tx);

        tracing::info!(
            workers = worker_count,
            engine = %shared.engine,
            "Worker pool started"
        );

        let mut idle: Vec<usize> = (0..worker_count).rev().collect();
        let mut exhausted = false;
        let mut report = PoolReport::default();
        let mut deadline = Instant::now() + idle_timeout;

        loop {
            if exhausted && idle.len() == worker_count {
                break;
            }

            tokio::select! {
                event = event_rx.recv() => {
                    deadline = Instant::now() + idle_timeout;
                    match event {
                        Some(WorkerEvent::Console { kind, message }) => {
                            tracing::debug!(kind = ?kind, message = %message, "Transform console output");
                            callbacks.on_message(PrinterMessage::Console {
                                console_kind: kind,
                                message,
                            });
                        }
                        Some(WorkerEvent::Done { worker, path, result }) => {
                            idle.push(worker);
                            self.complete_file(&mut report, path, result, callbacks);
                        }
                        None => {
                            tracing::warn!("All workers exited unexpectedly");
                            break;
                        }
                    }
                }
                next = paths.next(), if !exhausted && !idle.is_empty() => {
                    deadline = Instant::now() + idle_timeout;
                    match next {
                        None => exhausted = true,
                        Some(path) => {
                            report.total_files += 1;
                            match self.loader.load(&path).await {
                                Ok(source) => {
                                    if let Some(worker) = idle.pop() {
                                        if let Err(std_mpsc::SendError(job)) =
                                            workers[worker].jobs.send(Job::Run { path, source })
                                        {
                                            let path = match job {
                                                Job::Run { path, .. } => path,
                                                Job::Shutdown => PathBuf::new(),
                                            };
                                            let error = SandboxError::Execution(format!("worker {} is no longer running", worker));
                                            self.complete_file(&mut report, path, Err(error), callbacks);
                                        }
                                    }
                                }
                                Err(e) => {
                                    let error = SandboxError::Execution(e.to_string());
                                    self.complete_file(&mut report, path, Err(error), callbacks);
                                }
                            }
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        timeout_ms = idle_timeout.as_millis() as u64,
                        busy_workers = worker_count - idle.len(),
                        "No worker activity within the idle timeout, terminating workers"
                    );
                    report.timed_out = true;
                    break;
                }
            }
        }

        for worker in &workers {
            let _ = worker.jobs.send(Job::Shutdown);
            if report.timed_out {
                if let Some(kill_switch) = &worker.kill_switch {
                    kill_switch.kill();
                }
            }
        }
        callbacks.on_message(PrinterMessage::Finish);

        tracing::info!(
            total = report.total_files,
            processed = report.processed_files,
            failed = report.failed_files,
            commands = report.commands,
            timed_out = report.timed_out,
            "Worker pool finished"
        );
        Ok(report)
    }

    fn complete_file(
        &self,
        report: &mut PoolReport,
        path: PathBuf,
        result: Result<Vec<FormattedFileCommand>, SandboxError>,
        callbacks: &mut dyn RunCallbacks,
    ) {
        report.processed_files += 1;

        match result {
            Ok(commands) => {
                report.commands += commands.len();
                for command in commands {
                    callbacks.on_command(command);
                }
            }
            Err(e) => {
                report.failed_files += 1;
                let message = e.to_string();
                tracing::debug!(path = %path.display(), error = %message, "Transform failed for file");
                callbacks.on_message(PrinterMessage::Error {
                    path: Some(path.clone()),
                    message: message.clone(),
                });
                callbacks.on_error(CodemodExecutionError {
                    codemod_name: self.options.codemod_name.clone().unwrap_or_default(),
                    file_path: path.clone(),
                    message,
                });
            }
        }

        callbacks.on_message(PrinterMessage::Progress {
            codemod_name: self.options.codemod_name.clone(),
            processed_file_number: report.processed_files,
            total_file_number: report.total_files,
            processed_file_name: Some(relative_to(&self.options.target, &path)),
        });
    }
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn spawn_worker(
    id: usize,
    mut context: Box<dyn ExecutionContext>,
    shared: Arc<WorkerShared>,
    events: UnboundedSender<WorkerEvent>,
) -> std::io::Result<WorkerHandle> {
    let (jobs_tx, jobs_rx) = std_mpsc::channel::<Job>();
    let kill_switch = context.kill_switch();

    // Detached: a hung transform must not block shutdown.
    std::thread::Builder::new()
        .name(format!("codemod-worker-{}", id))
        .spawn(move || {
            while let Ok(Job::Run { path, source }) = jobs_rx.recv() {
                let file = FileInfo { path, source };
                let result = execute_job(context.as_mut(), &shared, &file, &events);
                let done = WorkerEvent::Done {
                    worker: id,
                    path: file.path,
                    result,
                };
                if events.send(done).is_err() {
                    break;
                }
            }
        })?;

    Ok(WorkerHandle {
        jobs: jobs_tx,
        kill_switch,
    })
}

fn execute_job(
    context: &mut dyn ExecutionContext,
    shared: &WorkerShared,
    file: &FileInfo,
    events: &UnboundedSender<WorkerEvent>,
) -> Result<Vec<FormattedFileCommand>, SandboxError> {
    let run = FileRun {
        engine: shared.engine,
        arguments: &shared.arguments,
        format: shared.format,
        normalizer: shared.normalizer.as_ref(),
    };
    let mut forward = |kind: ConsoleKind, message: String| {
        let _ = events.send(WorkerEvent::Console { kind, message });
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut console = Console::new(&mut forward);
        run_file(context, &run, file, &mut console)
    }));

    match outcome {
        Ok(result) => result.map(|commands| build_formatted_commands(&shared.formatters, commands)),
        Err(payload) => Err(SandboxError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
