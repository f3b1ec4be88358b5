//! Out-of-process transforms.
//!
//! Each execution context is a separate OS process (for example a JS
//! runtime running a harness script). Host and worker exchange one JSON
//! object per line:
//!
//! ```text
//! host   -> worker  {"kind":"initialization","engine":"jscodeshift","entryPath":"...","source":"..."}
//! worker -> host    {"kind":"ready"} | {"kind":"initError","message":"..."}
//! host   -> worker  {"kind":"runCodemod","path":"...","data":"...","arguments":{...}}
//! worker -> host    {"kind":"console","consoleKind":"log","message":"..."}   (any number)
//!                   {"kind":"createFile","path":"...","data":"..."}          (any number)
//!                   {"kind":"result","value":...} | {"kind":"error","message":"..."}
//! ```
//!
//! An absent `value` means the transform returned nothing. The process can be
//! killed from another thread through its [`KillSwitch`].

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{
    Console, ExecutionContext, FileInfo, KillSwitch, SandboxError, ScriptHost, TransformModule,
    TransformOptions,
};
use crate::engines::filemod::Filemod;
use crate::messages::ConsoleKind;
use crate::settings::{ArgumentRecord, CodemodDescriptor, EngineKind};

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum HostMessage<'a> {
    #[serde(rename_all = "camelCase")]
    Initialization {
        engine: EngineKind,
        entry_path: &'a PathBuf,
        source: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    RunCodemod {
        path: &'a PathBuf,
        data: &'a str,
        arguments: &'a ArgumentRecord,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum WorkerMessage {
    Ready,
    InitError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Console {
        console_kind: ConsoleKind,
        message: String,
    },
    CreateFile {
        path: PathBuf,
        data: String,
    },
    #[serde(rename = "result")]
    Completed {
        #[serde(default, deserialize_with = "present_value")]
        value: Option<Value>,
    },
    Error {
        message: String,
    },
}

/// Distinguishes `"value": null` (`Some(Null)`) from an absent field (`None`).
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Runs transforms in child processes started from `program args...`.
#[derive(Debug, Clone)]
pub struct ProcessHost {
    program: String,
    args: Vec<String>,
}

impl ProcessHost {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl ScriptHost for ProcessHost {
    fn resolve_transform(
        &self,
        codemod: &CodemodDescriptor,
        source: &str,
    ) -> Result<Arc<dyn TransformModule>, SandboxError> {
        let module = ProcessModule {
            program: self.program.clone(),
            args: self.args.clone(),
            engine: codemod.engine,
            entry_path: codemod.entry_path.clone(),
            source: source.to_string(),
        };

        // Probe once so a module without a transform export fails at
        // resolution instead of once per worker.
        module.spawn_context()?;
        Ok(Arc::new(module))
    }

    fn resolve_filemod(
        &self,
        codemod: &CodemodDescriptor,
        _source: &str,
    ) -> Result<Arc<dyn Filemod>, SandboxError> {
        Err(SandboxError::Unsupported(format!(
            "filemod {} cannot run out of process",
            codemod.display_name()
        )))
    }
}

struct ProcessModule {
    program: String,
    args: Vec<String>,
    engine: EngineKind,
    entry_path: PathBuf,
    source: String,
}

impl TransformModule for ProcessModule {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn spawn_context(&self) -> Result<Box<dyn ExecutionContext>, SandboxError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SandboxError::Process(format!("failed to start {}: {}", self.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Process("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Process("worker stdout unavailable".to_string()))?;

        let mut context = ProcessContext {
            child: Arc::new(Mutex::new(child)),
            stdin,
            stdout: BufReader::new(stdout),
        };

        context.send(&HostMessage::Initialization {
            engine: self.engine,
            entry_path: &self.entry_path,
            source: &self.source,
        })?;

        match context.receive()? {
            WorkerMessage::Ready => {
                tracing::debug!(program = %self.program, entry = %self.entry_path.display(), "Sandbox process ready");
                Ok(Box::new(context))
            }
            WorkerMessage::InitError { message } => Err(SandboxError::MissingExport(message)),
            _ => Err(SandboxError::Protocol(
                "expected ready or initError after initialization".to_string(),
            )),
        }
    }
}

struct ProcessContext {
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ProcessContext {
    fn send(&mut self, message: &HostMessage<'_>) -> Result<(), SandboxError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| SandboxError::Protocol(e.to_string()))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|e| SandboxError::Process(format!("failed to write to worker: {}", e)))
    }

    fn receive(&mut self) -> Result<WorkerMessage, SandboxError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| SandboxError::Process(format!("failed to read from worker: {}", e)))?;
            if read == 0 {
                return Err(SandboxError::Process("worker exited".to_string()));
            }
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(line.trim()).map_err(|e| {
                SandboxError::Protocol(format!("invalid worker message {:?}: {}", line.trim(), e))
            });
        }
    }
}

impl ExecutionContext for ProcessContext {
    fn execute(
        &mut self,
        file: &FileInfo,
        options: &mut TransformOptions,
        console: &mut Console<'_>,
    ) -> Result<Option<Value>, SandboxError> {
        self.send(&HostMessage::RunCodemod {
            path: &file.path,
            data: &file.source,
            arguments: &options.arguments,
        })?;

        loop {
            match self.receive()? {
                WorkerMessage::Console {
                    console_kind,
                    message,
                } => console.emit(console_kind, message),
                WorkerMessage::CreateFile { path, data } => options.create_file(path, data),
                WorkerMessage::Completed { value } => return Ok(value),
                WorkerMessage::Error { message } => return Err(SandboxError::Execution(message)),
                WorkerMessage::Ready | WorkerMessage::InitError { .. } => {
                    return Err(SandboxError::Protocol(
                        "unexpected lifecycle message while running".to_string(),
                    ))
                }
            }
        }
    }

    fn kill_switch(&self) -> Option<Arc<dyn KillSwitch>> {
        Some(Arc::new(ChildKillSwitch {
            child: Arc::clone(&self.child),
        }))
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let _ = child.kill();
        let _ = child.wait();
    }
}

struct ChildKillSwitch {
    child: Arc<Mutex<Child>>,
}

impl KillSwitch for ChildKillSwitch {
    fn kill(&self) {
        let mut child = self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = child.kill() {
            tracing::debug!(error = %e, "Failed to kill sandbox process");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const ECHO_WORKER: &str = r#"
read init
printf '%s\n' '{"kind":"ready"}'
while read line; do
  printf '%s\n' '{"kind":"console","consoleKind":"info","message":"working"}'
  printf '%s\n' '{"kind":"createFile","path":"extra.ts","data":"export {};"}'
  printf '%s\n' '{"kind":"result","value":"rewritten"}'
done
"#;

    fn host(script: &str) -> ProcessHost {
        ProcessHost::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    fn codemod() -> CodemodDescriptor {
        CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/t.js")
    }

    #[test]
    fn test_round_trip_through_process() {
        let module = host(ECHO_WORKER)
            .resolve_transform(&codemod(), "module.exports = () => {}")
            .unwrap();
        let mut context = module.spawn_context().unwrap();

        let mut seen = Vec::new();
        let mut sink = |kind: ConsoleKind, message: String| seen.push((kind, message));
        let mut console = Console::new(&mut sink);
        let mut options = TransformOptions::default();
        let file = FileInfo {
            path: PathBuf::from("/code/a.ts"),
            source: "original".into(),
        };

        let value = context.execute(&file, &mut options, &mut console).unwrap();
        let second = context.execute(&file, &mut options, &mut console).unwrap();
        drop(console);

        assert_eq!(value, Some(Value::String("rewritten".into())));
        assert_eq!(second, value);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (ConsoleKind::Info, "working".to_string()));
        assert_eq!(options.take_created_files().len(), 2);
    }

    #[test]
    fn test_init_error_is_missing_export() {
        let script = r#"read init; printf '%s\n' '{"kind":"initError","message":"no default export"}'"#;
        let result = host(script).resolve_transform(&codemod(), "");
        assert!(matches!(result, Err(SandboxError::MissingExport(m)) if m == "no default export"));
    }

    #[test]
    fn test_null_and_absent_values() {
        let completed: WorkerMessage =
            serde_json::from_str(r#"{"kind":"result","value":null}"#).unwrap();
        assert!(matches!(completed, WorkerMessage::Completed { value: Some(Value::Null) }));

        let completed: WorkerMessage = serde_json::from_str(r#"{"kind":"result"}"#).unwrap();
        assert!(matches!(completed, WorkerMessage::Completed { value: None }));
    }

    #[test]
    fn test_worker_exit_is_process_error() {
        let script = r#"read init; printf '%s\n' '{"kind":"ready"}'; read line"#;
        let module = host(script).resolve_transform(&codemod(), "").unwrap();
        let mut context = module.spawn_context().unwrap();
        let mut sink = |_: ConsoleKind, _: String| {};
        let mut console = Console::new(&mut sink);
        let file = FileInfo {
            path: PathBuf::from("/code/a.ts"),
            source: String::new(),
        };
        let err = context
            .execute(&file, &mut TransformOptions::default(), &mut console)
            .unwrap_err();
        assert!(matches!(err, SandboxError::Process(_)));
    }

    #[test]
    fn test_kill_switch_stops_busy_worker() {
        let script = r#"read init; printf '%s\n' '{"kind":"ready"}'; read line; exec sleep 30"#;
        let module = host(script).resolve_transform(&codemod(), "").unwrap();
        let mut context = module.spawn_context().unwrap();
        let kill_switch = context.kill_switch().unwrap();

        let killer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            kill_switch.kill();
        });

        let started = std::time::Instant::now();
        let mut sink = |_: ConsoleKind, _: String| {};
        let mut console = Console::new(&mut sink);
        let file = FileInfo {
            path: PathBuf::from("/code/a.ts"),
            source: String::new(),
        };
        let result = context.execute(&file, &mut TransformOptions::default(), &mut console);
        killer.join().unwrap();

        assert!(result.is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
