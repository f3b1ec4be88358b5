//! Codemod execution engine.
//!
//! Runs JavaScript-style transforms, whole-tree filemods and multi-step
//! recipes over a project directory. Transforms execute inside a pool of
//! sandboxed workers; filemods see the tree through a copy-on-write
//! overlay; every change comes back as a [`FileCommand`] the caller applies
//! (or previews, on a dry run).

pub mod commands;
pub mod config;
pub mod engines;
pub mod error;
pub mod fs;
pub mod messages;
pub mod patterns;
pub mod runner;
pub mod settings;
pub mod vfs;
pub mod worker;

pub use commands::{apply_command, FileCommand, FormattedFileCommand, FormatterRegistry, PreviewRecord};
pub use config::EngineConfig;
pub use error::{ConfigError, RunnerError};
pub use fs::{FileSystem, MemoryFileSystem, RealFileSystem};
pub use messages::{CodemodExecutionError, ConsoleKind, PrinterMessage};
pub use runner::{run_codemod, EngineContext, RunCallbacks, RunReport, RunResult, Runner};
pub use settings::{
    build_safe_argument_record, ArgumentRecord, CodemodDescriptor, EngineKind, FlowSettings,
    RunSettings,
};
pub use vfs::UnifiedFileSystem;

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to warnings everywhere and info for this
/// crate. Loads `.env` (or `../.env`) first so `RUST_LOG` can live there.
/// Safe to call more than once.
pub fn init_tracing() {
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,codemod_engine=info")),
        )
        .try_init();
}
