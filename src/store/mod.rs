//! Session directory layout and structured result persistence.
//!
//! ```text
//! <session-dir>/
//!   result.json          canonical session record
//!   report.md            rendered human summary
//!   logs/attempt-N.log   raw output per attempt
//!   workspace/           final agent code
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::session::{Attempt, Session};

/// Paths of one session's directory tree.
#[derive(Debug, Clone)]
pub struct SessionDirs {
    pub root: PathBuf,
    pub workspace: PathBuf,
    pub logs: PathBuf,
}

impl SessionDirs {
    /// Creates `<base>/<session-id>/` with `workspace/` and `logs/`.
    pub fn create(base: &Path, session_id: &str) -> Result<Self, StoreError> {
        let root = base.join(session_id);
        let workspace = root.join("workspace");
        let logs = root.join("logs");
        fs::create_dir_all(&workspace)?;
        fs::create_dir_all(&logs)?;
        Ok(Self {
            root,
            workspace,
            logs,
        })
    }

    /// Creates `workspace/` and `logs/` directly under `root`, with no
    /// session-id level. The eval layout puts session files next to
    /// `agent.log` inside `<language-slug>/`.
    pub fn create_at(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let workspace = root.join("workspace");
        let logs = root.join("logs");
        fs::create_dir_all(&workspace)?;
        fs::create_dir_all(&logs)?;
        Ok(Self {
            root,
            workspace,
            logs,
        })
    }

    /// Wraps an existing session directory without creating anything.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            workspace: root.join("workspace"),
            logs: root.join("logs"),
            root,
        }
    }

    /// Flushes one attempt's raw output to `logs/attempt-N.log`.
    pub fn write_attempt_log(&self, attempt: &Attempt) -> Result<(), StoreError> {
        let path = self.logs.join(format!("attempt-{}.log", attempt.number));
        fs::write(&path, &attempt.raw_output)?;
        debug!(path = %path.display(), "Wrote attempt log");
        Ok(())
    }

    /// Writes the canonical `result.json`.
    ///
    /// Struct fields are declared alphabetically, so pretty-printed
    /// output has a stable byte layout for re-hashing.
    pub fn write_result(&self, session: &Session) -> Result<(), StoreError> {
        write_json(&self.root.join("result.json"), session)
    }

    /// Writes the rendered `report.md`.
    pub fn write_report(&self, session: &Session) -> Result<(), StoreError> {
        fs::write(self.root.join("report.md"), render_report(session))?;
        Ok(())
    }

    /// Reads `result.json` back, as `show` does.
    pub fn read_result(&self) -> Result<Session, StoreError> {
        let text = fs::read_to_string(self.root.join("result.json"))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Raw bytes of `result.json`, emitted verbatim by `show --json`.
    pub fn read_result_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(fs::read(self.root.join("result.json"))?)
    }
}

/// Serializes a value as pretty JSON with a trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    fs::write(path, body)?;
    Ok(())
}

/// Renders the human session summary.
pub fn render_report(session: &Session) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Session {}\n\n", session.id));
    out.push_str(&format!("- Task: `{}`\n", session.reference()));
    out.push_str(&format!("- Status: **{}**\n", session.status));
    out.push_str(&format!("- Image: `{}`\n", session.config.image));
    out.push_str(&format!("- Attempts: {}\n", session.attempts.len()));
    if let Some(error) = &session.error {
        out.push_str(&format!("- Error: {error}\n"));
    }
    out.push('\n');

    for attempt in &session.attempts {
        let outcome = match (attempt.passed, attempt.exit_code) {
            (true, _) => "passed".to_string(),
            (false, Some(code)) => format!("failed (exit {code})"),
            (false, None) => "timed out".to_string(),
        };
        out.push_str(&format!(
            "## Attempt {} — {outcome} in {} ms\n\n",
            attempt.number, attempt.duration_ms
        ));
        if attempt.error_summary.is_empty() {
            out.push_str("No diagnostics extracted.\n\n");
        } else {
            for line in &attempt.error_summary {
                out.push_str(&format!("- `{line}`\n"));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ExecStatus;
    use crate::session::{SessionConfig, SessionMode};
    use crate::tasks::{Difficulty, Language, Task, Tier};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample_session() -> Session {
        let task = Task {
            language: Language::Go,
            slug: "bank-account".to_string(),
            tier: Tier::Core,
            difficulty: Difficulty::Hard,
            weight: None,
            description: String::new(),
            stub_files: BTreeMap::from([("a.go".to_string(), "package a\n".to_string())]),
            hidden_files: BTreeMap::new(),
            test_command: vec!["go".to_string(), "test".to_string()],
            timeout_seconds: None,
        };
        let config = SessionConfig {
            image: "golang:1.23-bookworm".to_string(),
            max_attempts: 20,
            mode: SessionMode::Run,
            timeout_seconds: 60,
            watch: false,
        };
        let mut session = Session::new(&task, config);
        let mut attempt = Attempt::from_exec(
            1,
            ExecStatus::Exited(1),
            b"--- FAIL: TestDeposit\n".to_vec(),
            42,
            vec!["--- FAIL: TestDeposit".to_string()],
        );
        attempt.raw_output = b"--- FAIL: TestDeposit\n".to_vec();
        session.push_attempt(attempt);
        session.finish();
        session
    }

    #[test]
    fn test_directory_layout() {
        let base = TempDir::new().unwrap();
        let dirs = SessionDirs::create(base.path(), "go-bank-account-x").unwrap();

        assert!(dirs.workspace.is_dir());
        assert!(dirs.logs.is_dir());
        assert_eq!(dirs.root, base.path().join("go-bank-account-x"));
    }

    #[test]
    fn test_result_round_trip_and_verbatim_bytes() {
        let base = TempDir::new().unwrap();
        let dirs = SessionDirs::create(base.path(), "s1").unwrap();
        let session = sample_session();

        dirs.write_result(&session).unwrap();
        let loaded = dirs.read_result().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.status, session.status);
        assert_eq!(loaded.attempts.len(), 1);

        // Writing the loaded record again must be byte-identical.
        let first = dirs.read_result_bytes().unwrap();
        dirs.write_result(&loaded).unwrap();
        let second = dirs.read_result_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_attempt_log_written() {
        let base = TempDir::new().unwrap();
        let dirs = SessionDirs::create(base.path(), "s1").unwrap();
        let session = sample_session();

        dirs.write_attempt_log(&session.attempts[0]).unwrap();
        let log = fs::read_to_string(dirs.logs.join("attempt-1.log")).unwrap();
        assert!(log.contains("--- FAIL: TestDeposit"));
    }

    #[test]
    fn test_report_contents() {
        let session = sample_session();
        let report = render_report(&session);
        assert!(report.contains("# Session"));
        assert!(report.contains("go/bank-account"));
        assert!(report.contains("fail"));
        assert!(report.contains("- `--- FAIL: TestDeposit`"));
    }
}
