//! Sandboxed transform execution
//!
//! A [`ScriptHost`] turns a codemod's entry source into a
//! [`TransformModule`]. The [`pool::WorkerPool`] asks the module for one
//! [`ExecutionContext`] per worker and runs every candidate file through one
//! of them. Contexts are isolated from each other and from the engine:
//!
//! - [`native::NativeHost`] runs compiled-in Rust transforms, one dedicated
//!   thread per worker, with panics captured per file.
//! - [`process::ProcessHost`] runs each worker as a separate OS process that
//!   speaks line-delimited JSON and can be killed at any time.

pub mod native;
pub mod noop;
pub mod pool;
pub mod process;
pub mod sandbox;

pub use native::NativeHost;
pub use noop::{ParenthesisNormalizer, SourceNormalizer};
pub use pool::{PoolReport, WorkerPool, WorkerPoolOptions};
pub use process::ProcessHost;
pub use sandbox::{validate_return, TransformOutcome};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use crate::engines::filemod::Filemod;
use crate::fs::{FileSystem, FsError};
use crate::messages::ConsoleKind;
use crate::settings::{ArgumentRecord, ArgumentValue, CodemodDescriptor, EngineKind};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("no callable transform export found: {0}")]
    MissingExport(String),

    #[error("{0}")]
    Validation(String),

    #[error("transform failed: {0}")]
    Execution(String),

    #[error("transform panicked: {0}")]
    Panicked(String),

    #[error("sandbox process error: {0}")]
    Process(String),

    #[error("sandbox protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Unsupported(String),
}

/// The file handed to a transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub source: String,
}

/// Engine API object handed to a transform alongside the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformApi {
    pub engine: EngineKind,
    pub codemod_name: String,
}

/// Options handed to a transform: the sanitized arguments plus a side
/// channel for creating additional files.
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub arguments: ArgumentRecord,
    created_files: Vec<(PathBuf, String)>,
}

impl TransformOptions {
    pub fn new(arguments: ArgumentRecord) -> Self {
        Self {
            arguments,
            created_files: Vec::new(),
        }
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentValue> {
        self.arguments.get(name)
    }

    /// Request creation of a new file next to the transformed one.
    pub fn create_file(&mut self, path: impl Into<PathBuf>, data: impl Into<String>) {
        self.created_files.push((path.into(), data.into()));
    }

    pub(crate) fn take_created_files(&mut self) -> Vec<(PathBuf, String)> {
        std::mem::take(&mut self.created_files)
    }
}

/// Console shim: forwards transform output tagged by log kind.
pub struct Console<'a> {
    sink: &'a mut dyn FnMut(ConsoleKind, String),
}

impl<'a> Console<'a> {
    pub fn new(sink: &'a mut dyn FnMut(ConsoleKind, String)) -> Self {
        Self { sink }
    }

    pub fn emit(&mut self, kind: ConsoleKind, message: impl Into<String>) {
        (self.sink)(kind, message.into());
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.emit(ConsoleKind::Log, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.emit(ConsoleKind::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.emit(ConsoleKind::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.emit(ConsoleKind::Error, message);
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.emit(ConsoleKind::Debug, message);
    }
}

/// Forcibly stops a context from another thread.
pub trait KillSwitch: Send + Sync {
    fn kill(&self);
}

/// One isolated context that runs a transform against single files.
pub trait ExecutionContext: Send {
    /// Run the transform against `file`.
    ///
    /// `Ok(None)` means the transform returned nothing (no change),
    /// `Ok(Some(Value::Null))` means it asked to skip the file.
    fn execute(
        &mut self,
        file: &FileInfo,
        options: &mut TransformOptions,
        console: &mut Console<'_>,
    ) -> Result<Option<Value>, SandboxError>;

    /// Handle for terminating the context while it is busy, if supported.
    fn kill_switch(&self) -> Option<Arc<dyn KillSwitch>> {
        None
    }
}

/// A resolved transform, able to spawn isolated execution contexts.
pub trait TransformModule: Send + Sync {
    fn engine(&self) -> EngineKind;

    fn spawn_context(&self) -> Result<Box<dyn ExecutionContext>, SandboxError>;
}

/// Resolves codemod sources into runnable modules.
pub trait ScriptHost: Send + Sync {
    /// Resolve a per-file transform. A source without a callable transform
    /// export yields [`SandboxError::MissingExport`].
    fn resolve_transform(
        &self,
        codemod: &CodemodDescriptor,
        source: &str,
    ) -> Result<Arc<dyn TransformModule>, SandboxError>;

    /// Resolve a whole-tree filemod.
    fn resolve_filemod(
        &self,
        codemod: &CodemodDescriptor,
        source: &str,
    ) -> Result<Arc<dyn Filemod>, SandboxError>;
}

/// Loads a codemod's entry source.
pub trait SourceLoader: Send + Sync {
    fn load_source(&self, entry_path: &Path) -> Result<String, FsError>;
}

/// [`SourceLoader`] reading from a [`FileSystem`].
pub struct FsSourceLoader {
    fs: Arc<dyn FileSystem>,
}

impl FsSourceLoader {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

impl SourceLoader for FsSourceLoader {
    fn load_source(&self, entry_path: &Path) -> Result<String, FsError> {
        self.fs.read_to_string(entry_path)
    }
}

/// Loads candidate files for the worker pool.
#[async_trait]
pub trait FileLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<String, FsError>;
}

/// [`FileLoader`] reading from a [`FileSystem`] on the blocking pool.
pub struct FsFileLoader {
    fs: Arc<dyn FileSystem>,
}

impl FsFileLoader {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl FileLoader for FsFileLoader {
    async fn load(&self, path: &Path) -> Result<String, FsError> {
        let fs = Arc::clone(&self.fs);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || fs.read_to_string(&path))
            .await
            .map_err(|e| FsError::Task(e.to_string()))?
    }
}

/// Resolved modules for one run, keyed by entry path.
///
/// Owned by whoever drives the run and passed down explicitly, so repeated
/// recipe steps reuse a module without any process-wide state.
#[derive(Default)]
pub struct ModuleCache {
    transforms: DashMap<PathBuf, Arc<dyn TransformModule>>,
    filemods: DashMap<PathBuf, Arc<dyn Filemod>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transform<F>(
        &self,
        entry_path: &Path,
        resolve: F,
    ) -> Result<Arc<dyn TransformModule>, SandboxError>
    where
        F: FnOnce() -> Result<Arc<dyn TransformModule>, SandboxError>,
    {
        if let Some(module) = self.transforms.get(entry_path) {
            return Ok(Arc::clone(module.value()));
        }
        let module = resolve()?;
        self.transforms
            .insert(entry_path.to_path_buf(), Arc::clone(&module));
        Ok(module)
    }

    pub fn filemod<F>(&self, entry_path: &Path, resolve: F) -> Result<Arc<dyn Filemod>, SandboxError>
    where
        F: FnOnce() -> Result<Arc<dyn Filemod>, SandboxError>,
    {
        if let Some(filemod) = self.filemods.get(entry_path) {
            return Ok(Arc::clone(filemod.value()));
        }
        let filemod = resolve()?;
        self.filemods
            .insert(entry_path.to_path_buf(), Arc::clone(&filemod));
        Ok(filemod)
    }

    pub fn len(&self) -> usize {
        self.transforms.len() + self.filemods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
