//! Include/exclude pattern resolution and lazy path streams.
//!
//! Patterns are normalized so that a bare relative pattern matches at any
//! depth below the target:
//!
//! | input        | normalized          |
//! |--------------|---------------------|
//! | `foo/*.ts`   | `**/foo/*.ts`       |
//! | `/foo/*.ts`  | `**/foo/*.ts`       |
//! | `**/*.ts`    | `**/*.ts`           |
//! | `dist/`      | `**/dist/**/*.*`    |
//! | `./src/*.ts` | `src/*.ts` (anchored at the target) |

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::engines::ast_grep;
use crate::error::ConfigError;
use crate::fs::{FileSystem, FsError};
use crate::settings::{CodemodDescriptor, EngineKind, FlowSettings};

/// Excluded unless the user explicitly includes them.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "node_modules/",
    "dist/",
    "build/",
    "out/",
    ".next/",
    "coverage/",
    "*.min.js",
];

pub const DEFAULT_VERSION_CONTROL_DIRECTORIES: &[&str] = &[".git/", ".svn/", ".hg/"];

/// Default includes for JavaScript/TypeScript engines.
pub const JS_FAMILY_PATTERNS: &[&str] = &[
    "**/*.js",
    "**/*.jsx",
    "**/*.ts",
    "**/*.tsx",
    "**/*.vue",
    "**/*.svelte",
];

pub const ANY_FILE_PATTERN: &str = "**/*.*";

/// Capacity of the channel between the directory walker and its consumer.
const PATH_CHANNEL_CAPACITY: usize = 64;

/// Lazy stream of candidate file paths.
pub type PathStream = BoxStream<'static, PathBuf>;

/// Normalize one user-facing pattern (see module docs).
pub fn normalize_pattern(pattern: &str) -> String {
    let formatted = if let Some(anchored) = pattern.strip_prefix("./") {
        anchored.to_string()
    } else if pattern.starts_with("**") {
        pattern.to_string()
    } else if pattern.starts_with('/') {
        format!("**{}", pattern)
    } else {
        format!("**/{}", pattern)
    };

    if formatted.ends_with('/') {
        format!("{}**/*.*", formatted)
    } else {
        formatted
    }
}

/// Resolved include and exclude patterns for one codemod run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Where the include patterns came from, for the run summary.
    pub reason: String,
}

/// Resolve the patterns for `codemod`.
///
/// Include priority: user include/files, then the codemod's own include,
/// then ast-grep rule languages, then filemod include patterns, then the
/// engine defaults. Default and `.gitignore` excludes are dropped when the
/// user explicitly includes the same pattern.
///
/// `engine_source` is the codemod's entry source (the rule file for
/// ast-grep). `filemod_include` are the include patterns a filemod declares.
pub fn build_patterns(
    fs: &dyn FileSystem,
    flow_settings: &FlowSettings,
    codemod: &CodemodDescriptor,
    engine_source: Option<&str>,
    filemod_include: Option<&[String]>,
) -> Result<PatternSet, ConfigError> {
    let user_excluded = dedup(flow_settings.exclude.iter().map(|p| normalize_pattern(p)));
    let default_excluded = dedup(
        DEFAULT_EXCLUDE_PATTERNS
            .iter()
            .chain(DEFAULT_VERSION_CONTROL_DIRECTORIES)
            .map(|p| normalize_pattern(p)),
    );
    let gitignore_excluded = dedup(
        read_gitignore(fs, &flow_settings.target)
            .iter()
            .map(|p| normalize_pattern(p)),
    );

    let mut patterns: Vec<String> = Vec::new();
    let mut reason = String::new();

    if flow_settings.include.is_some() || flow_settings.files.is_some() {
        reason = "Using include patterns and file paths from user input".to_string();
        patterns.extend(flow_settings.include.iter().flatten().cloned());
        patterns.extend(
            flow_settings
                .files
                .iter()
                .flatten()
                .map(|path| path.to_string_lossy().to_string()),
        );
    } else if let Some(include) = &codemod.include {
        reason = "Using include patterns from codemod settings".to_string();
        patterns.extend(include.iter().cloned());
    }

    if patterns.is_empty() && codemod.engine == EngineKind::AstGrep {
        reason = "Using include patterns from the ast-grep rule language".to_string();
        patterns = ast_grep::include_patterns_for_rule(engine_source.unwrap_or_default())?;
    }

    if codemod.engine == EngineKind::Filemod {
        if let Some(include) = filemod_include.filter(|include| !include.is_empty()) {
            reason = "Using include patterns from the filemod".to_string();
            patterns.extend(include.iter().cloned());
        }
    }

    if patterns.is_empty() {
        reason = "Using default include patterns for the codemod engine".to_string();
        if codemod.engine.is_js_family() {
            patterns.extend(JS_FAMILY_PATTERNS.iter().map(|p| p.to_string()));
        } else {
            patterns.push(ANY_FILE_PATTERN.to_string());
        }
    }

    let formatted_include = dedup(patterns.iter().map(|p| normalize_pattern(p)));

    let exclude: Vec<String> = dedup(
        user_excluded
            .iter()
            .chain(&default_excluded)
            .chain(&gitignore_excluded)
            .filter(|pattern| {
                let overridable =
                    default_excluded.contains(*pattern) || gitignore_excluded.contains(*pattern);
                !overridable || !formatted_include.contains(*pattern)
            })
            .cloned(),
    );
    let include = formatted_include
        .into_iter()
        .filter(|pattern| !exclude.contains(pattern))
        .collect();

    Ok(PatternSet {
        include,
        exclude,
        reason,
    })
}

/// Console summary printed before a codemod starts.
pub fn run_summary(codemod: &CodemodDescriptor, target: &Path, patterns: &PatternSet) -> String {
    format!(
        "Running: {}\nTarget: {}\n{}\nIncluded patterns: {}\nExcluded patterns: {}",
        codemod.display_name(),
        target.display(),
        patterns.reason,
        patterns.include.join(", "),
        patterns.exclude.join(", "),
    )
}

/// Message emitted when no file matched.
pub fn no_files_message(target: &Path) -> String {
    format!(
        "No files to process were found in {} with the given include/exclude patterns. Exiting...",
        target.display()
    )
}

fn read_gitignore(fs: &dyn FileSystem, target: &Path) -> Vec<String> {
    let Ok(contents) = fs.read_to_string(&target.join(".gitignore")) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(str::to_string)
        .collect()
}

fn dedup(patterns: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for pattern in patterns {
        if !unique.contains(&pattern) {
            unique.push(pattern);
        }
    }
    unique
}

// ============================================================================
// Matching
// ============================================================================

/// Compiled include/exclude matcher rooted at the target directory.
///
/// Candidates are matched both relative to the root and as absolute paths,
/// so explicit absolute file lists work alongside relative globs.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl GlobMatcher {
    pub fn new(root: &Path, include: &[String], exclude: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            root: root.to_path_buf(),
            include: build_glob_set(include)?,
            exclude: build_glob_set(exclude)?,
        })
    }

    pub fn from_patterns(root: &Path, patterns: &PatternSet) -> Result<Self, ConfigError> {
        Self::new(root, &patterns.include, &patterns.exclude)
    }

    pub fn is_match(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let included = self.include.is_match(relative) || self.include.is_match(path);
        included && !self.exclude.is_match(relative) && !self.exclude.is_match(path)
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?);
    }
    builder.build().map_err(|e| ConfigError::InvalidPattern {
        pattern: patterns.join(", "),
        reason: e.to_string(),
    })
}

fn compile_glob(pattern: &str) -> Result<Glob, ConfigError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

// ============================================================================
// Path generation
// ============================================================================

/// Stream matching files below `root`.
///
/// The walk runs on a blocking task and feeds a bounded channel, so it
/// advances only as fast as the consumer pulls. Dropping the stream stops
/// the walk. Must be called from within a tokio runtime.
pub fn build_path_stream(
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    matcher: GlobMatcher,
) -> PathStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<PathBuf>(PATH_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let result = fs.walk_files(&root, &mut |path| {
            if !matcher.is_match(&path) {
                return ControlFlow::Continue(());
            }
            match tx.blocking_send(path) {
                Ok(()) => ControlFlow::Continue(()),
                Err(_) => ControlFlow::Break(()),
            }
        });
        if let Err(e) = result {
            tracing::warn!(root = %root.display(), error = %e, "Failed to walk target directory");
        }
    });

    stream::unfold(rx, |mut rx| async move {
        let path = rx.recv().await?;
        Some((path, rx))
    })
    .boxed()
}

/// Pull the first path. Returns `None` for an empty stream, otherwise a
/// stream that still yields every path.
pub async fn non_empty(mut paths: PathStream) -> Option<PathStream> {
    let first = paths.next().await?;
    Some(stream::once(async move { first }).chain(paths).boxed())
}

/// Eagerly collect matching files below `root`, in walk order.
pub fn collect_paths(
    fs: &dyn FileSystem,
    root: &Path,
    matcher: &GlobMatcher,
) -> Result<Vec<PathBuf>, FsError> {
    let mut paths = Vec::new();
    fs.walk_files(root, &mut |path| {
        if matcher.is_match(&path) {
            paths.push(path);
        }
        ControlFlow::Continue(())
    })?;
    Ok(paths)
}
