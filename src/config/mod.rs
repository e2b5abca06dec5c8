//! Harness configuration: TOML file loading and the resolved record
//! the rest of the harness consumes.
//!
//! Files are searched in order (`SANITY_CONFIG` overrides the search
//! path entirely): `./sanity.toml`, `$HOME/.sanity.toml`,
//! `$HOME/.config/sanity/config.toml`. Options merge across files with
//! the first value winning.

mod resolver;

pub use resolver::{host_user, ImageResolver, MountSets};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Default bound on attempts within one session.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

/// Default wall clock granted to an agent per task during eval.
pub const DEFAULT_AGENT_TIMEOUT_SECONDS: u64 = 600;

/// Environment variable overriding the config search path.
pub const CONFIG_ENV_VAR: &str = "SANITY_CONFIG";

/// Resolved harness configuration with all defaults applied.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Bound on attempts within one session.
    pub max_attempts: u32,
    /// Per-attempt timeout in seconds unless the task overrides it.
    pub default_timeout: u64,
    /// Root directory for session output.
    pub session_dir: PathBuf,
    /// Root directory for eval run output.
    pub eval_dir: PathBuf,
    /// Output format for reports: `text` or `json`.
    pub output_format: String,
    /// Per-language image overrides, keyed by language name.
    pub images: BTreeMap<String, String>,
    /// Whether missing images are pulled automatically.
    pub auto_pull: bool,
    /// Sandbox mount declarations, unexpanded.
    pub sandbox: SandboxPaths,
    /// Configured agents by name.
    pub agents: BTreeMap<String, AgentEntry>,
}

/// Raw mount path lists from the `[sandbox]` section.
#[derive(Debug, Clone, Default)]
pub struct SandboxPaths {
    pub writable_dirs: Vec<String>,
    pub readable_denylist: Vec<String>,
    pub shared_readwrite_dirs: Vec<String>,
    pub shared_readonly_dirs: Vec<String>,
}

/// One `[agents.<name>]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEntry {
    /// Executable to spawn.
    pub command: String,
    /// Argv template; `{prompt}` is substituted at invocation.
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag used to pass a model name, e.g. `--model`.
    #[serde(default)]
    pub model_flag: Option<String>,
    /// Extra environment for the agent process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Languages the agent supports; empty means all.
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_timeout: DEFAULT_TIMEOUT_SECONDS,
            session_dir: PathBuf::from("sessions"),
            eval_dir: PathBuf::from("eval-results"),
            output_format: "text".to_string(),
            images: BTreeMap::new(),
            auto_pull: true,
            sandbox: SandboxPaths::default(),
            agents: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from the standard search path.
    pub fn load() -> Result<Self, ConfigError> {
        let paths = search_paths();
        Self::load_from(&paths)
    }

    /// Loads and merges the given files in order; missing files are
    /// skipped, and the first file to set an option wins.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = RawConfig::default();
        for path in paths {
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
                path: path.clone(),
                source,
            })?;
            let raw: RawConfig =
                toml::from_str(&text).map_err(|e| ConfigError::Malformed {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            debug!(path = %path.display(), "Merged config file");
            merged.merge_from(raw);
        }

        let config = merged.resolve();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "harness.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.default_timeout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "harness.default_timeout".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        if !matches!(self.output_format.as_str(), "text" | "json") {
            return Err(ConfigError::InvalidValue {
                key: "harness.output_format".to_string(),
                message: format!("unknown format '{}'", self.output_format),
            });
        }
        Ok(())
    }
}

/// Config file search path, honoring `SANITY_CONFIG`.
pub fn search_paths() -> Vec<PathBuf> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        return vec![PathBuf::from(explicit)];
    }

    let mut paths = vec![PathBuf::from("sanity.toml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".sanity.toml"));
        paths.push(home.join(".config/sanity/config.toml"));
    }
    paths
}

/// On-disk shape: every option optional so files can be partial.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    harness: RawHarness,
    #[serde(default)]
    docker: RawDocker,
    #[serde(default)]
    sandbox: RawSandbox,
    #[serde(default)]
    agents: BTreeMap<String, AgentEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHarness {
    max_attempts: Option<u32>,
    default_timeout: Option<u64>,
    session_dir: Option<PathBuf>,
    eval_dir: Option<PathBuf>,
    output_format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDocker {
    auto_pull: Option<bool>,
    /// Catch-all for `<language>_image` keys.
    #[serde(flatten)]
    images: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSandbox {
    writable_dirs: Option<Vec<String>>,
    readable_denylist: Option<Vec<String>>,
    shared_readwrite_dirs: Option<Vec<String>>,
    shared_readonly_dirs: Option<Vec<String>>,
}

impl RawConfig {
    /// Fills unset options from `other`. Existing values win, so files
    /// merged earlier take precedence.
    fn merge_from(&mut self, other: RawConfig) {
        macro_rules! keep_first {
            ($field:expr, $incoming:expr) => {
                if $field.is_none() {
                    $field = $incoming;
                }
            };
        }

        keep_first!(self.harness.max_attempts, other.harness.max_attempts);
        keep_first!(self.harness.default_timeout, other.harness.default_timeout);
        keep_first!(self.harness.session_dir, other.harness.session_dir);
        keep_first!(self.harness.eval_dir, other.harness.eval_dir);
        keep_first!(self.harness.output_format, other.harness.output_format);
        keep_first!(self.docker.auto_pull, other.docker.auto_pull);
        keep_first!(self.sandbox.writable_dirs, other.sandbox.writable_dirs);
        keep_first!(
            self.sandbox.readable_denylist,
            other.sandbox.readable_denylist
        );
        keep_first!(
            self.sandbox.shared_readwrite_dirs,
            other.sandbox.shared_readwrite_dirs
        );
        keep_first!(
            self.sandbox.shared_readonly_dirs,
            other.sandbox.shared_readonly_dirs
        );

        for (key, value) in other.docker.images {
            self.docker.images.entry(key).or_insert(value);
        }
        for (name, entry) in other.agents {
            self.agents.entry(name).or_insert(entry);
        }
    }

    fn resolve(self) -> HarnessConfig {
        let defaults = HarnessConfig::default();

        let images = self
            .docker
            .images
            .into_iter()
            .filter_map(|(key, value)| {
                let language = key.strip_suffix("_image")?;
                let image = value.as_str()?;
                Some((language.to_string(), image.to_string()))
            })
            .collect();

        HarnessConfig {
            max_attempts: self.harness.max_attempts.unwrap_or(defaults.max_attempts),
            default_timeout: self
                .harness
                .default_timeout
                .unwrap_or(defaults.default_timeout),
            session_dir: self.harness.session_dir.unwrap_or(defaults.session_dir),
            eval_dir: self.harness.eval_dir.unwrap_or(defaults.eval_dir),
            output_format: self
                .harness
                .output_format
                .unwrap_or(defaults.output_format),
            images,
            auto_pull: self.docker.auto_pull.unwrap_or(defaults.auto_pull),
            sandbox: SandboxPaths {
                writable_dirs: self.sandbox.writable_dirs.unwrap_or_default(),
                readable_denylist: self.sandbox.readable_denylist.unwrap_or_default(),
                shared_readwrite_dirs: self.sandbox.shared_readwrite_dirs.unwrap_or_default(),
                shared_readonly_dirs: self.sandbox.shared_readonly_dirs.unwrap_or_default(),
            },
            agents: self.agents,
        }
    }
}

/// Loads config from a single explicit file, used by tests.
pub fn load_file(path: &Path) -> Result<HarnessConfig, ConfigError> {
    HarnessConfig::load_from(&[path.to_path_buf()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_files() {
        let config = HarnessConfig::load_from(&[PathBuf::from("/nonexistent/sanity.toml")]).unwrap();
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.default_timeout, DEFAULT_TIMEOUT_SECONDS);
        assert!(config.auto_pull);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_full_file() {
        let file = write_config(
            r#"
[harness]
max_attempts = 5
default_timeout = 30
session_dir = "/tmp/sanity-sessions"
output_format = "json"

[docker]
go_image = "golang:1.22"
auto_pull = false

[sandbox]
shared_readonly_dirs = [".config/agents"]
readable_denylist = [".ssh"]

[agents.claude]
command = "claude"
args = ["-p", "{prompt}"]
model_flag = "--model"
env = { NO_COLOR = "1" }
"#,
        );

        let config = load_file(file.path()).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.default_timeout, 30);
        assert_eq!(config.output_format, "json");
        assert_eq!(config.images.get("go").unwrap(), "golang:1.22");
        assert!(!config.auto_pull);
        assert_eq!(config.sandbox.shared_readonly_dirs, vec![".config/agents"]);

        let claude = config.agents.get("claude").unwrap();
        assert_eq!(claude.command, "claude");
        assert_eq!(claude.args, vec!["-p", "{prompt}"]);
        assert_eq!(claude.model_flag.as_deref(), Some("--model"));
        assert_eq!(claude.env.get("NO_COLOR").unwrap(), "1");
    }

    #[test]
    fn test_first_value_wins_across_files() {
        let first = write_config("[harness]\nmax_attempts = 3\n");
        let second = write_config(
            "[harness]\nmax_attempts = 9\ndefault_timeout = 120\n[docker]\nrust_image = \"rust:1.80\"\n",
        );

        let config = HarnessConfig::load_from(&[
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ])
        .unwrap();

        // First file set it, second file may not override.
        assert_eq!(config.max_attempts, 3);
        // Only the second file set these.
        assert_eq!(config.default_timeout, 120);
        assert_eq!(config.images.get("rust").unwrap(), "rust:1.80");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_attempts = write_config("[harness]\nmax_attempts = 0\n");
        assert!(matches!(
            load_file(zero_attempts.path()),
            Err(ConfigError::InvalidValue { .. })
        ));

        let bad_format = write_config("[harness]\noutput_format = \"yaml\"\n");
        assert!(load_file(bad_format.path()).is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let file = write_config("[harness\nmax_attempts = 1");
        assert!(matches!(
            load_file(file.path()),
            Err(ConfigError::Malformed { .. })
        ));
    }
}
