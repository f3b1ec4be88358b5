//! Messages emitted to the printer/UI while a codemod runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log level of a transform's console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleKind {
    Debug,
    Error,
    Info,
    Log,
    Trace,
    Warn,
}

/// Message delivered to the `on_message` callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PrinterMessage {
    /// A single file failed; other files are unaffected.
    #[serde(rename_all = "camelCase")]
    Error {
        path: Option<PathBuf>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        codemod_name: Option<String>,
        processed_file_number: usize,
        total_file_number: usize,
        processed_file_name: Option<PathBuf>,
    },
    /// The worker pool is done (or was terminated by the idle timeout).
    Finish,
    #[serde(rename_all = "camelCase")]
    Console {
        console_kind: ConsoleKind,
        message: String,
    },
}

impl PrinterMessage {
    pub fn console(console_kind: ConsoleKind, message: impl Into<String>) -> Self {
        PrinterMessage::Console {
            console_kind,
            message: message.into(),
        }
    }
}

/// Error delivered to the `on_error` callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodemodExecutionError {
    pub codemod_name: String,
    pub file_path: PathBuf,
    pub message: String,
}
