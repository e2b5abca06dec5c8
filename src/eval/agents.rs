//! Agent registry and invocation.
//!
//! Built-in entries map an agent name to an argv template; custom
//! agents come from `[agents.<name>]` config sections. The `{prompt}`
//! token is substituted at invocation; agents without the token receive
//! the prompt on stdin.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{AgentEntry, HarnessConfig};
use crate::error::EvalError;
use crate::tasks::{Language, Task};

/// Token substituted with the task prompt in argv templates.
const PROMPT_TOKEN: &str = "{prompt}";

/// A resolved agent: built-in or from config.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub model_flag: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Languages the agent supports; empty means all.
    pub languages: Vec<Language>,
}

impl AgentSpec {
    /// Whether the agent supports a language.
    pub fn supports(&self, language: Language) -> bool {
        self.languages.is_empty() || self.languages.contains(&language)
    }

    fn from_entry(name: &str, entry: &AgentEntry) -> Result<Self, EvalError> {
        let languages = entry
            .languages
            .iter()
            .map(|l| Language::from_str(l))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            command: entry.command.clone(),
            args: entry.args.clone(),
            model_flag: entry.model_flag.clone(),
            env: entry.env.clone(),
            languages,
        })
    }
}

/// Built-in agent entries, overridable from config.
fn builtin(name: &str) -> Option<AgentSpec> {
    let spec = |command: &str, args: &[&str], model_flag: Option<&str>| AgentSpec {
        name: name.to_string(),
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        model_flag: model_flag.map(str::to_string),
        env: BTreeMap::new(),
        languages: Vec::new(),
    };

    match name {
        "claude" => Some(spec("claude", &["-p", PROMPT_TOKEN], Some("--model"))),
        "codex" => Some(spec(
            "codex",
            &["exec", "--full-auto", PROMPT_TOKEN],
            Some("--model"),
        )),
        "aider" => Some(spec(
            "aider",
            &["--yes", "--message", PROMPT_TOKEN],
            Some("--model"),
        )),
        _ => None,
    }
}

/// Resolves an agent by name: config entries shadow built-ins.
pub fn resolve_agent(name: &str, config: &HarnessConfig) -> Result<AgentSpec, EvalError> {
    if let Some(entry) = config.agents.get(name) {
        return AgentSpec::from_entry(name, entry);
    }
    builtin(name).ok_or_else(|| EvalError::UnknownAgent(name.to_string()))
}

/// Prompt handed to the agent for a task.
pub fn task_prompt(task: &Task) -> String {
    let mut prompt = task.description.trim_end().to_string();
    if prompt.is_empty() {
        prompt = format!("Solve the task {}.", task.reference());
    }
    prompt.push_str("\n\nEdit files in place to pass the tests.\n");
    prompt
}

/// Result of one agent subprocess run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Spawns the agent against a workspace.
///
/// Stdout and stderr both append to `log_path`, preserving arrival
/// order at the file descriptor level. On timeout the process is
/// killed and the run records `timed_out`.
pub async fn invoke(
    spec: &AgentSpec,
    prompt: &str,
    model: Option<&str>,
    workspace: &Path,
    timeout: Duration,
    log_path: &Path,
) -> Result<AgentRun, EvalError> {
    let start = Instant::now();

    let mut args: Vec<String> = Vec::new();
    let mut prompt_in_args = false;
    for arg in &spec.args {
        if arg.contains(PROMPT_TOKEN) {
            prompt_in_args = true;
            args.push(arg.replace(PROMPT_TOKEN, prompt));
        } else {
            args.push(arg.clone());
        }
    }
    if let (Some(flag), Some(model)) = (&spec.model_flag, model) {
        args.push(flag.clone());
        args.push(model.to_string());
    }

    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(&spec.command);
    cmd.args(&args)
        .current_dir(workspace)
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if prompt_in_args {
        cmd.stdin(Stdio::null());
    } else {
        cmd.stdin(Stdio::piped());
    }

    info!(agent = %spec.name, workspace = %workspace.display(), "Invoking agent");
    let mut child = cmd
        .spawn()
        .map_err(|e| EvalError::AgentFailed(format!("spawn {}: {e}", spec.command)))?;

    if !prompt_in_args {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| EvalError::AgentFailed(format!("write prompt: {e}")))?;
            stdin.shutdown().await.ok();
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let run = AgentRun {
                exit_code: status.code(),
                timed_out: false,
                duration: start.elapsed(),
            };
            debug!(agent = %spec.name, exit = ?run.exit_code, "Agent finished");
            Ok(run)
        }
        Ok(Err(e)) => Err(EvalError::AgentFailed(format!("wait: {e}"))),
        Err(_) => {
            warn!(agent = %spec.name, ?timeout, "Agent timed out, killing");
            child.kill().await.ok();
            Ok(AgentRun {
                exit_code: None,
                timed_out: true,
                duration: start.elapsed(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Difficulty, Tier};
    use std::collections::BTreeMap as Map;
    use tempfile::TempDir;

    fn sample_task() -> Task {
        Task {
            language: Language::Go,
            slug: "bank-account".to_string(),
            tier: Tier::Core,
            difficulty: Difficulty::Hard,
            weight: None,
            description: "Make the account safe under concurrent deposits.".to_string(),
            stub_files: Map::from([("a.go".to_string(), "package a\n".to_string())]),
            hidden_files: Map::new(),
            test_command: vec!["go".to_string(), "test".to_string()],
            timeout_seconds: None,
        }
    }

    #[test]
    fn test_builtin_agents_resolve() {
        let config = HarnessConfig::default();
        let claude = resolve_agent("claude", &config).unwrap();
        assert_eq!(claude.command, "claude");
        assert!(claude.args.iter().any(|a| a.contains(PROMPT_TOKEN)));
        assert!(claude.supports(Language::Zig));

        assert!(matches!(
            resolve_agent("no-such-agent", &config),
            Err(EvalError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_config_agent_shadows_builtin() {
        let mut config = HarnessConfig::default();
        config.agents.insert(
            "claude".to_string(),
            AgentEntry {
                command: "/opt/claude-wrapper".to_string(),
                args: vec!["{prompt}".to_string()],
                model_flag: None,
                env: Map::new(),
                languages: vec!["go".to_string(), "rust".to_string()],
            },
        );

        let agent = resolve_agent("claude", &config).unwrap();
        assert_eq!(agent.command, "/opt/claude-wrapper");
        assert!(agent.supports(Language::Go));
        assert!(!agent.supports(Language::Dart));
    }

    #[test]
    fn test_task_prompt_carries_instruction() {
        let prompt = task_prompt(&sample_task());
        assert!(prompt.starts_with("Make the account safe"));
        assert!(prompt.contains("Edit files in place to pass the tests."));
    }

    #[tokio::test]
    async fn test_invoke_captures_output_and_exit() {
        let spec = AgentSpec {
            name: "echo".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo did: {prompt}".to_string()],
            model_flag: None,
            env: Map::new(),
            languages: Vec::new(),
        };

        let workspace = TempDir::new().unwrap();
        let log = workspace.path().join("agent.log");
        let run = invoke(
            &spec,
            "fix it",
            None,
            workspace.path(),
            Duration::from_secs(10),
            &log,
        )
        .await
        .unwrap();

        assert_eq!(run.exit_code, Some(0));
        assert!(!run.timed_out);
        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.contains("did: fix it"));
    }

    #[tokio::test]
    async fn test_invoke_timeout_kills() {
        let spec = AgentSpec {
            name: "sleeper".to_string(),
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            model_flag: None,
            env: Map::new(),
            languages: Vec::new(),
        };

        let workspace = TempDir::new().unwrap();
        let log = workspace.path().join("agent.log");
        let start = Instant::now();
        let run = invoke(
            &spec,
            "unused",
            None,
            workspace.path(),
            Duration::from_millis(300),
            &log,
        )
        .await
        .unwrap();

        assert!(run.timed_out);
        assert!(run.exit_code.is_none());
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
