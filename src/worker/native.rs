//! Compiled-in transforms.
//!
//! [`NativeHost`] maps entry paths to Rust closures and [`Filemod`]
//! implementations. Each worker runs its context on a dedicated thread; a
//! panicking transform is caught per file by the pool, and a hung one is
//! abandoned when the idle timeout fires.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use super::{
    Console, ExecutionContext, FileInfo, SandboxError, ScriptHost, SourceLoader, TransformApi,
    TransformModule, TransformOptions,
};
use crate::engines::filemod::Filemod;
use crate::fs::{normalize_path, FsError};
use crate::settings::{CodemodDescriptor, EngineKind};

/// Signature of a compiled-in per-file transform.
///
/// The return value follows the transform contract: `Ok(None)` leaves the
/// file alone, `Ok(Some(Value::Null))` skips it and a string replaces it.
pub type NativeTransformFn = dyn Fn(&FileInfo, &TransformApi, &mut TransformOptions, &mut Console<'_>) -> Result<Option<Value>, String>
    + Send
    + Sync;

/// Registry of compiled-in transforms, filemods and entry sources.
#[derive(Default)]
pub struct NativeHost {
    transforms: HashMap<PathBuf, Arc<NativeTransformFn>>,
    filemods: HashMap<PathBuf, Arc<dyn Filemod>>,
    sources: HashMap<PathBuf, String>,
}

impl NativeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform<F>(mut self, entry_path: impl AsRef<Path>, transform: F) -> Self
    where
        F: Fn(&FileInfo, &TransformApi, &mut TransformOptions, &mut Console<'_>) -> Result<Option<Value>, String>
            + Send
            + Sync
            + 'static,
    {
        self.transforms
            .insert(normalize_path(entry_path.as_ref()), Arc::new(transform));
        self
    }

    pub fn with_filemod(mut self, entry_path: impl AsRef<Path>, filemod: impl Filemod + 'static) -> Self {
        self.filemods
            .insert(normalize_path(entry_path.as_ref()), Arc::new(filemod));
        self
    }

    /// Register the entry source returned by [`SourceLoader::load_source`],
    /// e.g. an ast-grep rule file.
    pub fn with_source(mut self, entry_path: impl AsRef<Path>, source: impl Into<String>) -> Self {
        self.sources
            .insert(normalize_path(entry_path.as_ref()), source.into());
        self
    }
}

impl std::fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHost")
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .field("filemods", &self.filemods.keys().collect::<Vec<_>>())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ScriptHost for NativeHost {
    fn resolve_transform(
        &self,
        codemod: &CodemodDescriptor,
        _source: &str,
    ) -> Result<Arc<dyn TransformModule>, SandboxError> {
        let entry = normalize_path(&codemod.entry_path);
        let transform = self
            .transforms
            .get(&entry)
            .ok_or_else(|| SandboxError::MissingExport(entry.display().to_string()))?;

        Ok(Arc::new(NativeModule {
            engine: codemod.engine,
            api: TransformApi {
                engine: codemod.engine,
                codemod_name: codemod.display_name(),
            },
            transform: Arc::clone(transform),
        }))
    }

    fn resolve_filemod(
        &self,
        codemod: &CodemodDescriptor,
        _source: &str,
    ) -> Result<Arc<dyn Filemod>, SandboxError> {
        let entry = normalize_path(&codemod.entry_path);
        self.filemods
            .get(&entry)
            .cloned()
            .ok_or_else(|| SandboxError::MissingExport(entry.display().to_string()))
    }
}

impl SourceLoader for NativeHost {
    fn load_source(&self, entry_path: &Path) -> Result<String, FsError> {
        Ok(self
            .sources
            .get(&normalize_path(entry_path))
            .cloned()
            .unwrap_or_default())
    }
}

struct NativeModule {
    engine: EngineKind,
    api: TransformApi,
    transform: Arc<NativeTransformFn>,
}

impl TransformModule for NativeModule {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn spawn_context(&self) -> Result<Box<dyn ExecutionContext>, SandboxError> {
        Ok(Box::new(NativeContext {
            api: self.api.clone(),
            transform: Arc::clone(&self.transform),
        }))
    }
}

struct NativeContext {
    api: TransformApi,
    transform: Arc<NativeTransformFn>,
}

impl ExecutionContext for NativeContext {
    fn execute(
        &mut self,
        file: &FileInfo,
        options: &mut TransformOptions,
        console: &mut Console<'_>,
    ) -> Result<Option<Value>, SandboxError> {
        (self.transform)(file, &self.api, options, console).map_err(SandboxError::Execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ConsoleKind;
    use crate::settings::ArgumentRecord;

    #[test]
    fn test_resolve_and_execute() {
        let host = NativeHost::new().with_transform("/mods/./upper.js", |file, api, _, console| {
            console.info(api.codemod_name.clone());
            Ok(Some(Value::String(file.source.to_uppercase())))
        });
        let codemod = CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/upper.js")
            .with_name("upper");

        let module = host.resolve_transform(&codemod, "").unwrap();
        assert_eq!(module.engine(), EngineKind::Jscodeshift);

        let mut context = module.spawn_context().unwrap();
        let mut seen = Vec::new();
        let mut sink = |kind: ConsoleKind, message: String| seen.push((kind, message));
        let mut console = Console::new(&mut sink);
        let file = FileInfo {
            path: PathBuf::from("/code/a.ts"),
            source: "abc".into(),
        };
        let mut options = TransformOptions::new(ArgumentRecord::new());

        let value = context.execute(&file, &mut options, &mut console).unwrap();
        drop(console);
        assert_eq!(value, Some(Value::String("ABC".into())));
        assert_eq!(seen, vec![(ConsoleKind::Info, "upper".to_string())]);
        assert!(context.kill_switch().is_none());
    }

    #[test]
    fn test_missing_transform_is_missing_export() {
        let host = NativeHost::new();
        let codemod = CodemodDescriptor::new(EngineKind::TsMorph, "/mods/none.ts");
        assert!(matches!(
            host.resolve_transform(&codemod, ""),
            Err(SandboxError::MissingExport(_))
        ));
        assert!(matches!(
            host.resolve_filemod(&codemod, ""),
            Err(SandboxError::MissingExport(_))
        ));
    }

    #[test]
    fn test_transform_error_maps_to_execution() {
        let host = NativeHost::new()
            .with_transform("/mods/fail.js", |_, _, _, _| Err("cannot parse".to_string()));
        let codemod = CodemodDescriptor::new(EngineKind::Jscodeshift, "/mods/fail.js");
        let mut context = host
            .resolve_transform(&codemod, "")
            .unwrap()
            .spawn_context()
            .unwrap();

        let mut sink = |_: ConsoleKind, _: String| {};
        let mut console = Console::new(&mut sink);
        let file = FileInfo {
            path: PathBuf::from("/code/a.ts"),
            source: String::new(),
        };
        let err = context
            .execute(&file, &mut TransformOptions::default(), &mut console)
            .unwrap_err();
        assert!(matches!(err, SandboxError::Execution(message) if message == "cannot parse"));
    }

    #[test]
    fn test_source_loader() {
        let host = NativeHost::new().with_source("/rules/rule.yml", "language: ts");
        assert_eq!(
            host.load_source(Path::new("/rules/rule.yml")).unwrap(),
            "language: ts"
        );
        assert_eq!(host.load_source(Path::new("/rules/other.yml")).unwrap(), "");
    }
}
