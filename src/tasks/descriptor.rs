//! Task descriptors: identity, taxonomy, files, and the test command.
//!
//! A task lives at `<language>/<slug>/` in the embedded content tree.
//! Its `task.toml` names the stub and hidden files, which are loaded
//! from sibling paths in the same directory.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Languages the harness knows how to compile, test, and summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Rust,
    TypeScript,
    Kotlin,
    Dart,
    Zig,
}

impl Language {
    /// All supported languages, in canonical order.
    pub const ALL: [Language; 6] = [
        Language::Go,
        Language::Rust,
        Language::TypeScript,
        Language::Kotlin,
        Language::Dart,
        Language::Zig,
    ];

    /// Canonical lowercase name as used in task references and paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::Kotlin => "kotlin",
            Language::Dart => "dart",
            Language::Zig => "zig",
        }
    }

    /// Built-in container image used when config does not override it.
    pub fn default_image(&self) -> &'static str {
        match self {
            Language::Go => "golang:1.23-bookworm",
            Language::Rust => "rust:1.83-bookworm",
            Language::TypeScript => "node:22-bookworm",
            Language::Kotlin => "gradle:8.12-jdk21",
            Language::Dart => "dart:3.6",
            Language::Zig => "ziglang/zig:0.13.0",
        }
    }
}

impl FromStr for Language {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "go" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "kotlin" => Ok(Language::Kotlin),
            "dart" => Ok(Language::Dart),
            "zig" => Ok(Language::Zig),
            other => Err(TaskError::UnknownLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task tier: the core set every agent is measured on, plus extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Core,
    Extended,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Core => f.write_str("core"),
            Tier::Extended => f.write_str("extended"),
        }
    }
}

impl FromStr for Tier {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" => Ok(Tier::Core),
            "extended" => Ok(Tier::Extended),
            other => Err(TaskError::InvalidDescriptor {
                path: String::new(),
                message: format!("unknown tier '{other}'"),
            }),
        }
    }
}

/// Task difficulty. Maps to a default score weight when the descriptor
/// does not carry an explicit one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Hard,
    Expert,
}

impl Difficulty {
    /// Default score weight for this difficulty.
    pub fn default_weight(&self) -> f64 {
        match self {
            Difficulty::Hard => 1.0,
            Difficulty::Expert => 1.5,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Hard => f.write_str("hard"),
            Difficulty::Expert => f.write_str("expert"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hard" => Ok(Difficulty::Hard),
            "expert" => Ok(Difficulty::Expert),
            other => Err(TaskError::InvalidDescriptor {
                path: String::new(),
                message: format!("unknown difficulty '{other}'"),
            }),
        }
    }
}

/// Immutable task descriptor with projected file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task language.
    pub language: Language,
    /// Short task name, unique within a language.
    pub slug: String,
    /// Tier this task belongs to.
    pub tier: Tier,
    /// Difficulty classification.
    pub difficulty: Difficulty,
    /// Explicit score weight, if the descriptor carries one.
    pub weight: Option<f64>,
    /// Human task description, fed into the agent prompt.
    pub description: String,
    /// Relative path -> contents for files the agent edits.
    pub stub_files: BTreeMap<String, String>,
    /// Relative path -> contents for files applied only during eval.
    pub hidden_files: BTreeMap<String, String>,
    /// Shell-free argv executed inside the container.
    pub test_command: Vec<String>,
    /// Per-attempt timeout in seconds; the harness default applies
    /// when unset.
    pub timeout_seconds: Option<u64>,
}

impl Task {
    /// Canonical reference `<language>/<slug>`.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.language, self.slug)
    }

    /// Reference with `/` replaced by `-`, safe for directory names.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.language, self.slug)
    }

    /// Effective score weight: explicit weight or the difficulty default.
    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or_else(|| self.difficulty.default_weight())
    }

    /// Effective per-attempt timeout given the configured default.
    pub fn effective_timeout(&self, default_seconds: u64) -> u64 {
        self.timeout_seconds.unwrap_or(default_seconds)
    }

    /// Validates the descriptor invariants.
    ///
    /// Checked at registry load: non-empty stubs, positive weight and
    /// timeout, normalized relative paths, and stub/hidden disjointness.
    pub fn validate(&self) -> Result<(), TaskError> {
        let reference = self.reference();

        if self.stub_files.is_empty() {
            return Err(TaskError::InvalidDescriptor {
                path: reference,
                message: "task has no stub files".to_string(),
            });
        }
        if self.test_command.is_empty() {
            return Err(TaskError::InvalidDescriptor {
                path: reference,
                message: "task has no test command".to_string(),
            });
        }
        if self.timeout_seconds == Some(0) {
            return Err(TaskError::InvalidDescriptor {
                path: reference,
                message: "timeout_seconds must be positive".to_string(),
            });
        }
        if let Some(w) = self.weight {
            if !w.is_finite() || w <= 0.0 {
                return Err(TaskError::InvalidDescriptor {
                    path: reference,
                    message: format!("weight must be positive, got {w}"),
                });
            }
        }

        for path in self.stub_files.keys().chain(self.hidden_files.keys()) {
            validate_relative_path(&reference, path)?;
        }
        for path in self.hidden_files.keys() {
            if self.stub_files.contains_key(path) {
                return Err(TaskError::InvalidPath {
                    task: reference,
                    path: path.clone(),
                    message: "path appears in both stub_files and hidden_files".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Rejects absolute paths, `..` components, and empty segments.
pub(crate) fn validate_relative_path(task: &str, path: &str) -> Result<(), TaskError> {
    let invalid = |message: &str| TaskError::InvalidPath {
        task: task.to_string(),
        path: path.to_string(),
        message: message.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(invalid("path must be relative"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty path segment")),
            "." | ".." => return Err(invalid("path must be normalized")),
            _ => {}
        }
    }
    Ok(())
}

/// On-disk shape of `task.toml`.
#[derive(Debug, Deserialize)]
pub(crate) struct RawDescriptor {
    pub task: RawTaskSection,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTaskSection {
    pub language: String,
    pub slug: String,
    pub tier: String,
    pub difficulty: String,
    pub weight: Option<f64>,
    pub test_command: Vec<String>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub stub_files: Vec<String>,
    #[serde(default)]
    pub hidden_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            language: Language::Go,
            slug: "bank-account".to_string(),
            tier: Tier::Core,
            difficulty: Difficulty::Hard,
            weight: None,
            description: "Make the bank account safe under concurrency.".to_string(),
            stub_files: BTreeMap::from([(
                "bank_account.go".to_string(),
                "package bank\n".to_string(),
            )]),
            hidden_files: BTreeMap::new(),
            test_command: vec!["go".to_string(), "test".to_string(), "./...".to_string()],
            timeout_seconds: None,
        }
    }

    #[test]
    fn test_language_round_trip() {
        for lang in Language::ALL {
            assert_eq!(lang.as_str().parse::<Language>().unwrap(), lang);
        }
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_reference_and_dir_name() {
        let task = sample_task();
        assert_eq!(task.reference(), "go/bank-account");
        assert_eq!(task.dir_name(), "go-bank-account");
    }

    #[test]
    fn test_effective_timeout() {
        let mut task = sample_task();
        assert_eq!(task.effective_timeout(60), 60);
        task.timeout_seconds = Some(5);
        assert_eq!(task.effective_timeout(60), 5);
    }

    #[test]
    fn test_effective_weight_defaults() {
        let mut task = sample_task();
        assert!((task.effective_weight() - 1.0).abs() < f64::EPSILON);

        task.difficulty = Difficulty::Expert;
        assert!((task.effective_weight() - 1.5).abs() < f64::EPSILON);

        task.weight = Some(2.5);
        assert!((task.effective_weight() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_empty_stubs() {
        let mut task = sample_task();
        task.stub_files.clear();
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut task = sample_task();
        task.timeout_seconds = Some(0);
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overlapping_hidden() {
        let mut task = sample_task();
        task.hidden_files
            .insert("bank_account.go".to_string(), "dup".to_string());
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_path_validation() {
        assert!(validate_relative_path("t", "src/lib.rs").is_ok());
        assert!(validate_relative_path("t", "/etc/passwd").is_err());
        assert!(validate_relative_path("t", "../escape").is_err());
        assert!(validate_relative_path("t", "a//b").is_err());
        assert!(validate_relative_path("t", "").is_err());
    }
}
