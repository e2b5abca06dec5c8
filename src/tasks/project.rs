//! Workspace projection: writing task files into a host directory.

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::TaskError;
use crate::tasks::descriptor::Task;

/// Which file set a projection materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectMode {
    /// Practice runs: stubs only.
    Run,
    /// Eval runs: stubs plus hidden test files.
    Eval,
}

/// Writes the task's files into `dst`.
///
/// Stub files are written in both modes; hidden files only in
/// [`ProjectMode::Eval`]. Each file is written to a temp file in the
/// destination directory and renamed into place, so a crash never
/// leaves a half-written source file. Directories are created `0755`,
/// files `0644`.
pub fn project(task: &Task, mode: ProjectMode, dst: &Path) -> Result<(), TaskError> {
    fs::create_dir_all(dst)?;

    for (path, contents) in &task.stub_files {
        write_atomic(dst, path, contents)?;
    }
    if mode == ProjectMode::Eval {
        for (path, contents) in &task.hidden_files {
            write_atomic(dst, path, contents)?;
        }
    }

    debug!(
        task = %task.reference(),
        mode = ?mode,
        dst = %dst.display(),
        "Projected task files"
    );
    Ok(())
}

fn write_atomic(root: &Path, relative: &str, contents: &str) -> Result<(), TaskError> {
    let target = root.join(relative);
    let parent = target.parent().unwrap_or(root);
    fs::create_dir_all(parent)?;
    set_mode(parent, 0o755)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    let file = tmp.persist(&target).map_err(|e| e.error)?;
    drop(file);
    set_mode(&target, 0o644)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::descriptor::{Difficulty, Language, Tier};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn task_with_hidden() -> Task {
        Task {
            language: Language::Go,
            slug: "bank-account".to_string(),
            tier: Tier::Core,
            difficulty: Difficulty::Hard,
            weight: None,
            description: String::new(),
            stub_files: BTreeMap::from([
                ("bank_account.go".to_string(), "package bank\n".to_string()),
                ("nested/util.go".to_string(), "package nested\n".to_string()),
            ]),
            hidden_files: BTreeMap::from([(
                "bank_account_hidden_test.go".to_string(),
                "package bank\n".to_string(),
            )]),
            test_command: vec!["go".to_string(), "test".to_string()],
            timeout_seconds: None,
        }
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut files: Vec<String> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(dir)
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_run_mode_writes_exactly_stubs() {
        let task = task_with_hidden();
        let dir = TempDir::new().unwrap();

        project(&task, ProjectMode::Run, dir.path()).unwrap();

        assert_eq!(
            listing(dir.path()),
            vec!["bank_account.go".to_string(), "nested/util.go".to_string()]
        );
    }

    #[test]
    fn test_eval_mode_writes_stubs_and_hidden() {
        let task = task_with_hidden();
        let dir = TempDir::new().unwrap();

        project(&task, ProjectMode::Eval, dir.path()).unwrap();

        assert_eq!(
            listing(dir.path()),
            vec![
                "bank_account.go".to_string(),
                "bank_account_hidden_test.go".to_string(),
                "nested/util.go".to_string(),
            ]
        );
    }

    #[test]
    fn test_projection_overwrites_existing() {
        let task = task_with_hidden();
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("bank_account.go"), "stale").unwrap();
        project(&task, ProjectMode::Run, dir.path()).unwrap();

        let contents = fs::read_to_string(dir.path().join("bank_account.go")).unwrap();
        assert_eq!(contents, "package bank\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_modes() {
        use std::os::unix::fs::PermissionsExt;

        let task = task_with_hidden();
        let dir = TempDir::new().unwrap();
        project(&task, ProjectMode::Run, dir.path()).unwrap();

        let file_mode = fs::metadata(dir.path().join("bank_account.go"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o644);

        let dir_mode = fs::metadata(dir.path().join("nested"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o755);
    }
}
