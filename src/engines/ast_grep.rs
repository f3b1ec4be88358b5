//! ast-grep rule inspection.
//!
//! An ast-grep codemod is a YAML rule file, possibly holding several
//! `---`-separated rules. The top-level `language` of each rule decides which
//! files it applies to when the user gives no include patterns.

use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ConfigError;

const JAVASCRIPT: &[&str] = &["**/*.js", "**/*.jsx", "**/*.cjs", "**/*.mjs"];
const TYPESCRIPT: &[&str] = &["**/*.ts", "**/*.cts", "**/*.mts"];
const TSX: &[&str] = &["**/*.tsx"];
const PYTHON: &[&str] = &["**/*.py", "**/*.py3", "**/*.pyi", "**/*.bzl"];
const JAVA: &[&str] = &["**/*.java"];
const BASH: &[&str] = &[
    "**/*.bash",
    "**/*.bats",
    "**/*.cgi",
    "**/*.command",
    "**/*.env",
    "**/*.fcgi",
    "**/*.ksh",
    "**/*.sh",
    "**/*.sh.in",
    "**/*.tmux",
    "**/*.tool",
    "**/*.zsh",
];
const C: &[&str] = &["**/*.c", "**/*.h"];
const CPP: &[&str] = &[
    "**/*.cc", "**/*.hpp", "**/*.cpp", "**/*.c++", "**/*.hh", "**/*.cxx", "**/*.cu", "**/*.ino",
];
const JSON: &[&str] = &["**/*.json"];
const HTML: &[&str] = &["**/*.html", "**/*.htm", "**/*.xhtml"];

/// Glob patterns for an ast-grep language name (case-insensitive).
pub fn patterns_for_language(language: &str) -> Option<&'static [&'static str]> {
    let patterns = match language.to_ascii_lowercase().as_str() {
        "js" | "jsx" | "javascript" => JAVASCRIPT,
        "ts" | "typescript" => TYPESCRIPT,
        "tsx" => TSX,
        "py" | "python" => PYTHON,
        "java" => JAVA,
        "bash" | "bash-exp" => BASH,
        "c" => C,
        "cc" | "c++" | "cpp" | "cxx" => CPP,
        "json" => JSON,
        "html" => HTML,
        _ => return None,
    };
    Some(patterns)
}

/// Distinct top-level `language` values declared across the rule's
/// documents, in order. Nested keys and scalar text are never consulted.
pub fn languages_in_rule(source: &str) -> Result<Vec<String>, ConfigError> {
    let mut languages: Vec<String> = Vec::new();
    for document in serde_yaml::Deserializer::from_str(source) {
        let rule = Value::deserialize(document)?;
        let language = match rule.get("language") {
            None | Some(Value::Null) => continue,
            Some(Value::String(language)) => language.clone(),
            Some(other) => {
                let rendered = serde_yaml::to_string(other)?;
                return Err(ConfigError::UnsupportedAstGrepLanguage(
                    rendered.trim().to_string(),
                ));
            }
        };
        if !languages.contains(&language) {
            languages.push(language);
        }
    }
    Ok(languages)
}

/// Include patterns for every language the rule declares.
pub fn include_patterns_for_rule(source: &str) -> Result<Vec<String>, ConfigError> {
    let languages = languages_in_rule(source)?;
    if languages.is_empty() {
        return Err(ConfigError::MissingAstGrepLanguage);
    }

    let mut patterns = Vec::new();
    for language in languages {
        let language_patterns = patterns_for_language(&language)
            .ok_or_else(|| ConfigError::UnsupportedAstGrepLanguage(language.clone()))?;
        patterns.extend(language_patterns.iter().map(|p| p.to_string()));
    }
    Ok(patterns)
}
