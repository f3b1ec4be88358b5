//! Top-level error types.
//!
//! Per-file failures never surface here; they travel as
//! [`PrinterMessage::Error`](crate::messages::PrinterMessage) values. A
//! `RunnerError` means the run as a whole could not start or could not
//! commit its results.

use thiserror::Error;

use crate::fs::FsError;
use crate::settings::EngineKind;
use crate::vfs::VfsError;
use crate::worker::SandboxError;

/// Problems with the codemod description or its arguments, detected before
/// any file is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("recipe \"{recipe}\" contains nested recipe \"{child}\"; recipes may only be one level deep")]
    NestedRecipe { recipe: String, child: String },

    #[error("only recipes may declare child codemods (engine: {0})")]
    UnexpectedChildren(EngineKind),

    #[error("Piranha not supported")]
    PiranhaUnsupported,

    #[error("ast-grep rule does not declare a language")]
    MissingAstGrepLanguage,

    #[error("ast-grep language \"{0}\" is not supported")]
    UnsupportedAstGrepLanguage(String),

    #[error("invalid ast-grep rule: {0}")]
    InvalidAstGrepRule(#[from] serde_yaml::Error),

    #[error("could not resolve a transform export from {0}")]
    UnresolvableExport(String),

    #[error("missing required argument \"{0}\"")]
    MissingArgument(String),

    #[error("invalid value for argument \"{name}\": {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("invalid glob pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid codemod descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error("invalid environment value {key}={value}")]
    InvalidEnv { key: String, value: String },
}

/// Error returned by [`run_codemod`](crate::runner::run_codemod).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] FsError),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("failed to start worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl RunnerError {
    /// Whether this error was raised before execution began.
    pub fn is_config(&self) -> bool {
        matches!(self, RunnerError::Config(_))
    }
}
