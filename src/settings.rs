//! Codemod descriptors, run settings and argument handling.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::ConfigError;

/// Transform engine a codemod is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    #[serde(rename = "jscodeshift")]
    Jscodeshift,
    #[serde(rename = "ts-morph")]
    TsMorph,
    #[serde(rename = "ast-grep")]
    AstGrep,
    #[serde(rename = "filemod", alias = "repomod-engine")]
    Filemod,
    #[serde(rename = "recipe")]
    Recipe,
    #[serde(rename = "piranha")]
    Piranha,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Jscodeshift => "jscodeshift",
            EngineKind::TsMorph => "ts-morph",
            EngineKind::AstGrep => "ast-grep",
            EngineKind::Filemod => "filemod",
            EngineKind::Recipe => "recipe",
            EngineKind::Piranha => "piranha",
        }
    }

    /// Engines executed file-by-file through the worker pool.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            EngineKind::Jscodeshift | EngineKind::TsMorph | EngineKind::AstGrep
        )
    }

    /// Engines whose output is JavaScript/TypeScript source.
    pub fn is_js_family(&self) -> bool {
        matches!(self, EngineKind::Jscodeshift | EngineKind::TsMorph)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// Type of a declared codemod argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ArgumentKind {
    String,
    Number,
    Boolean,
    Enum { options: Vec<String> },
}

/// A typed argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

/// Argument declared by a codemod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: ArgumentKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<ArgumentValue>,
}

/// Sanitized arguments handed to transforms.
pub type ArgumentRecord = BTreeMap<String, ArgumentValue>;

/// Turn raw `name=value` strings into a typed record.
///
/// Undeclared raw values are dropped. Declared arguments without a value fall
/// back to their default; a required argument with neither is an error.
pub fn build_safe_argument_record(
    definitions: &[ArgumentDefinition],
    raw: &HashMap<String, String>,
) -> Result<ArgumentRecord, ConfigError> {
    let mut record = ArgumentRecord::new();

    for definition in definitions {
        let value = match raw.get(&definition.name) {
            Some(raw_value) => parse_argument(definition, raw_value)?,
            None => match &definition.default {
                Some(default) => default.clone(),
                None if definition.required => {
                    return Err(ConfigError::MissingArgument(definition.name.clone()))
                }
                None => continue,
            },
        };
        record.insert(definition.name.clone(), value);
    }

    Ok(record)
}

fn parse_argument(
    definition: &ArgumentDefinition,
    raw: &str,
) -> Result<ArgumentValue, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidArgument {
        name: definition.name.clone(),
        reason,
    };

    match &definition.kind {
        ArgumentKind::String => Ok(ArgumentValue::String(raw.to_string())),
        ArgumentKind::Number => raw
            .trim()
            .parse::<f64>()
            .map(ArgumentValue::Number)
            .map_err(|e| invalid(e.to_string())),
        ArgumentKind::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(ArgumentValue::Boolean(true)),
            "false" | "0" | "no" => Ok(ArgumentValue::Boolean(false)),
            other => Err(invalid(format!("expected a boolean, got \"{}\"", other))),
        },
        ArgumentKind::Enum { options } => {
            if options.iter().any(|option| option == raw) {
                Ok(ArgumentValue::String(raw.to_string()))
            } else {
                Err(invalid(format!(
                    "expected one of [{}], got \"{}\"",
                    options.join(", "),
                    raw
                )))
            }
        }
    }
}

// ============================================================================
// Codemod descriptor
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCodemodDescriptor {
    #[serde(default)]
    name: Option<String>,
    engine: EngineKind,
    #[serde(default)]
    entry_path: PathBuf,
    #[serde(default)]
    include: Option<Vec<String>>,
    #[serde(default)]
    arguments: Vec<ArgumentDefinition>,
    #[serde(default)]
    codemods: Vec<CodemodDescriptor>,
}

/// A codemod to run: one transform, or a recipe of transforms.
///
/// Recipes are exactly one level deep. Both constructors and deserialization
/// reject a recipe that contains another recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCodemodDescriptor")]
pub struct CodemodDescriptor {
    pub name: Option<String>,
    pub engine: EngineKind,
    pub entry_path: PathBuf,
    pub include: Option<Vec<String>>,
    pub arguments: Vec<ArgumentDefinition>,
    codemods: Vec<CodemodDescriptor>,
}

impl TryFrom<RawCodemodDescriptor> for CodemodDescriptor {
    type Error = ConfigError;

    fn try_from(raw: RawCodemodDescriptor) -> Result<Self, Self::Error> {
        let mut descriptor = if raw.engine == EngineKind::Recipe {
            CodemodDescriptor::recipe(raw.name.clone(), raw.codemods)?
        } else {
            if !raw.codemods.is_empty() {
                return Err(ConfigError::UnexpectedChildren(raw.engine));
            }
            CodemodDescriptor::new(raw.engine, raw.entry_path.clone())
        };
        descriptor.name = raw.name;
        descriptor.entry_path = raw.entry_path;
        descriptor.include = raw.include;
        descriptor.arguments = raw.arguments;
        Ok(descriptor)
    }
}

impl CodemodDescriptor {
    /// A single (non-recipe) codemod.
    pub fn new(engine: EngineKind, entry_path: impl Into<PathBuf>) -> Self {
        Self {
            name: None,
            engine,
            entry_path: entry_path.into(),
            include: None,
            arguments: Vec::new(),
            codemods: Vec::new(),
        }
    }

    /// A recipe over `codemods`, run in order.
    pub fn recipe(
        name: Option<String>,
        codemods: Vec<CodemodDescriptor>,
    ) -> Result<Self, ConfigError> {
        if let Some(nested) = codemods.iter().find(|c| c.engine == EngineKind::Recipe) {
            return Err(ConfigError::NestedRecipe {
                recipe: name.clone().unwrap_or_else(|| "recipe".to_string()),
                child: nested.display_name(),
            });
        }

        Ok(Self {
            name,
            engine: EngineKind::Recipe,
            entry_path: PathBuf::new(),
            include: None,
            arguments: Vec::new(),
            codemods,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_include(mut self, include: Vec<String>) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_arguments(mut self, arguments: Vec<ArgumentDefinition>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Child codemods of a recipe (empty otherwise).
    pub fn codemods(&self) -> &[CodemodDescriptor] {
        &self.codemods
    }

    /// Name for messages: the declared name, else the entry file name.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.entry_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.engine.to_string())
    }
}

// ============================================================================
// Flow and run settings
// ============================================================================

/// Which files to process and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSettings {
    /// User include globs; overrides codemod and engine defaults.
    pub include: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Explicit file list; treated like include patterns.
    pub files: Option<Vec<PathBuf>>,
    pub target: PathBuf,
    pub threads: usize,
    pub format: bool,
    pub idle_timeout_ms: u64,
}

impl FlowSettings {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self::from_config(&EngineConfig::default(), target)
    }

    pub fn from_config(config: &EngineConfig, target: impl Into<PathBuf>) -> Self {
        Self {
            include: None,
            exclude: Vec::new(),
            files: None,
            target: target.into(),
            threads: config.threads,
            format: config.format,
            idle_timeout_ms: config.idle_timeout.as_millis() as u64,
        }
    }

    pub fn with_include(mut self, include: Vec<String>) -> Self {
        self.include = Some(include);
        self
    }

    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_format(mut self, format: bool) -> Self {
        self.format = format;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Worker count, never below one.
    pub fn worker_count(&self) -> usize {
        self.threads.max(1)
    }
}

/// Whether commands are applied for real or previewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RunSettings {
    #[serde(rename_all = "camelCase")]
    Wet { case_hash_digest: String },
    #[serde(rename_all = "camelCase")]
    Dry {
        case_hash_digest: String,
        output_dir: PathBuf,
    },
}

impl RunSettings {
    pub fn wet() -> Self {
        RunSettings::Wet {
            case_hash_digest: new_case_hash_digest(),
        }
    }

    pub fn dry(output_dir: impl Into<PathBuf>) -> Self {
        RunSettings::Dry {
            case_hash_digest: new_case_hash_digest(),
            output_dir: output_dir.into(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunSettings::Dry { .. })
    }

    pub fn case_hash_digest(&self) -> &str {
        match self {
            RunSettings::Wet { case_hash_digest } | RunSettings::Dry { case_hash_digest, .. } => {
                case_hash_digest
            }
        }
    }

    pub fn output_dir(&self) -> Option<&Path> {
        match self {
            RunSettings::Wet { .. } => None,
            RunSettings::Dry { output_dir, .. } => Some(output_dir),
        }
    }

    /// Same run, with dry-run forced off.
    pub fn as_wet(&self) -> Self {
        RunSettings::Wet {
            case_hash_digest: self.case_hash_digest().to_string(),
        }
    }
}

fn new_case_hash_digest() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
