//! Task registry backed by an embedded read-only content tree.
//!
//! Task content is compiled into the binary so the harness ships as a
//! single artifact. Each task directory holds a `task.toml` descriptor,
//! a `prompt.md` description, and the stub/hidden source files the
//! descriptor names.

use std::collections::BTreeMap;
use std::str::FromStr;

use include_dir::{include_dir, Dir};
use tracing::debug;

use crate::error::TaskError;
use crate::tasks::descriptor::{Difficulty, Language, RawDescriptor, Task, Tier};

/// Embedded task content, rooted at `<language>/<slug>/`.
static TASK_TREE: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/tasks");

/// Filter for [`TaskRegistry::list`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub language: Option<Language>,
    pub tier: Option<Tier>,
    pub difficulty: Option<Difficulty>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.language.map_or(true, |l| task.language == l)
            && self.tier.map_or(true, |t| task.tier == t)
            && self.difficulty.map_or(true, |d| task.difficulty == d)
    }
}

/// In-memory registry of validated tasks keyed by canonical reference.
pub struct TaskRegistry {
    tasks: BTreeMap<String, Task>,
}

impl TaskRegistry {
    /// Loads and validates every task in the embedded content tree.
    pub fn load() -> Result<Self, TaskError> {
        Self::from_dir(&TASK_TREE)
    }

    /// Loads from an arbitrary embedded tree. Exposed for tests.
    pub(crate) fn from_dir(root: &Dir<'_>) -> Result<Self, TaskError> {
        let mut tasks = BTreeMap::new();

        for language_dir in root.dirs() {
            for task_dir in language_dir.dirs() {
                let descriptor_path = task_dir.path().join("task.toml");
                let Some(descriptor) = root.get_file(&descriptor_path) else {
                    continue;
                };
                let task = parse_task(root, task_dir.path(), descriptor.contents())?;
                task.validate()?;
                debug!(task = %task.reference(), "Loaded task");
                tasks.insert(task.reference(), task);
            }
        }

        Ok(Self { tasks })
    }

    /// Builds a registry from already-constructed tasks. Used by tests
    /// and by dry runs over synthetic task sets.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self, TaskError> {
        let mut map = BTreeMap::new();
        for task in tasks {
            task.validate()?;
            map.insert(task.reference(), task);
        }
        Ok(Self { tasks: map })
    }

    /// Returns tasks matching the filter, in reference order.
    pub fn list(&self, filter: TaskFilter) -> Vec<&Task> {
        self.tasks.values().filter(|t| filter.matches(t)).collect()
    }

    /// Resolves a canonical `<language>/<slug>` reference or a bare slug.
    ///
    /// A bare slug must be unique across languages, otherwise
    /// [`TaskError::Ambiguous`] is returned.
    pub fn resolve(&self, reference: &str) -> Result<&Task, TaskError> {
        if reference.contains('/') {
            return self
                .tasks
                .get(reference)
                .ok_or_else(|| TaskError::NotFound(reference.to_string()));
        }

        let matches: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.slug == reference)
            .collect();

        match matches.as_slice() {
            [] => Err(TaskError::NotFound(reference.to_string())),
            [task] => Ok(task),
            many => Err(TaskError::Ambiguous {
                slug: reference.to_string(),
                matches: many
                    .iter()
                    .map(|t| t.reference())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Number of loaded tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Parses a `task.toml` and pulls the named files out of the tree.
fn parse_task(
    root: &Dir<'_>,
    task_dir: &std::path::Path,
    descriptor: &[u8],
) -> Result<Task, TaskError> {
    let dir_label = task_dir.display().to_string();
    let text = std::str::from_utf8(descriptor).map_err(|e| TaskError::InvalidDescriptor {
        path: dir_label.clone(),
        message: format!("descriptor is not UTF-8: {e}"),
    })?;
    let raw: RawDescriptor = toml::from_str(text)?;
    let section = raw.task;

    let language = Language::from_str(&section.language)?;
    let tier = Tier::from_str(&section.tier)?;
    let difficulty = Difficulty::from_str(&section.difficulty)?;

    let load_files = |names: &[String]| -> Result<BTreeMap<String, String>, TaskError> {
        let mut files = BTreeMap::new();
        for name in names {
            let file = root
                .get_file(task_dir.join(name))
                .ok_or_else(|| TaskError::InvalidDescriptor {
                    path: dir_label.clone(),
                    message: format!("descriptor names missing file '{name}'"),
                })?;
            let contents =
                file.contents_utf8()
                    .ok_or_else(|| TaskError::InvalidDescriptor {
                        path: dir_label.clone(),
                        message: format!("file '{name}' is not UTF-8"),
                    })?;
            files.insert(name.clone(), contents.to_string());
        }
        Ok(files)
    };

    let description = root
        .get_file(task_dir.join("prompt.md"))
        .and_then(|f| f.contents_utf8())
        .unwrap_or_default()
        .to_string();

    Ok(Task {
        language,
        slug: section.slug,
        tier,
        difficulty,
        weight: section.weight,
        description,
        stub_files: load_files(&section.stub_files)?,
        hidden_files: load_files(&section.hidden_files)?,
        test_command: section.test_command,
        timeout_seconds: section.timeout_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn task(language: Language, slug: &str, tier: Tier, difficulty: Difficulty) -> Task {
        Task {
            language,
            slug: slug.to_string(),
            tier,
            difficulty,
            weight: None,
            description: String::new(),
            stub_files: BTreeMap::from([("stub.txt".to_string(), "x".to_string())]),
            hidden_files: BTreeMap::new(),
            test_command: vec!["true".to_string()],
            timeout_seconds: None,
        }
    }

    fn sample_registry() -> TaskRegistry {
        TaskRegistry::from_tasks([
            task(Language::Go, "bank-account", Tier::Core, Difficulty::Hard),
            task(Language::Rust, "bank-account", Tier::Core, Difficulty::Hard),
            task(Language::Rust, "split-borrow", Tier::Core, Difficulty::Hard),
            task(
                Language::TypeScript,
                "typed-emitter",
                Tier::Extended,
                Difficulty::Expert,
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_embedded_tree_loads() {
        let registry = TaskRegistry::load().unwrap();
        assert!(!registry.is_empty());
        assert!(registry.resolve("go/bank-account").is_ok());
    }

    #[test]
    fn test_list_filters() {
        let registry = sample_registry();

        assert_eq!(registry.list(TaskFilter::default()).len(), 4);

        let rust_only = TaskFilter {
            language: Some(Language::Rust),
            ..Default::default()
        };
        assert_eq!(registry.list(rust_only).len(), 2);

        let expert_only = TaskFilter {
            difficulty: Some(Difficulty::Expert),
            ..Default::default()
        };
        let experts = registry.list(expert_only);
        assert_eq!(experts.len(), 1);
        assert_eq!(experts[0].slug, "typed-emitter");
    }

    #[test]
    fn test_resolve_canonical() {
        let registry = sample_registry();
        let task = registry.resolve("rust/split-borrow").unwrap();
        assert_eq!(task.language, Language::Rust);
    }

    #[test]
    fn test_resolve_unique_bare_slug() {
        let registry = sample_registry();
        let task = registry.resolve("typed-emitter").unwrap();
        assert_eq!(task.language, Language::TypeScript);
    }

    #[test]
    fn test_resolve_ambiguous_bare_slug() {
        let registry = sample_registry();
        let err = registry.resolve("bank-account").unwrap_err();
        assert!(matches!(err, TaskError::Ambiguous { .. }));
        assert!(err.to_string().contains("go/bank-account"));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = sample_registry();
        assert!(matches!(
            registry.resolve("go/nonexistent"),
            Err(TaskError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve("nonexistent"),
            Err(TaskError::NotFound(_))
        ));
    }
}
