//! Image and mount resolution.
//!
//! Maps a task language to a container image (config override or
//! built-in default) and expands the configured mount sets into
//! existing host paths.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::HarnessConfig;
use crate::tasks::Language;

/// Resolved mount sets for a session container.
#[derive(Debug, Clone, Default)]
pub struct MountSets {
    /// Host dirs mounted read-write for this session alone.
    pub writable: Vec<PathBuf>,
    /// Host dirs mounted read-write and shared across sessions.
    pub shared_readwrite: Vec<PathBuf>,
    /// Host dirs mounted read-only and shared across sessions.
    pub shared_readonly: Vec<PathBuf>,
}

/// Resolves images, caches, and mounts from the merged config.
pub struct ImageResolver<'a> {
    config: &'a HarnessConfig,
}

impl<'a> ImageResolver<'a> {
    pub fn new(config: &'a HarnessConfig) -> Self {
        Self { config }
    }

    /// Image for a language: `[docker] <language>_image` wins, then the
    /// built-in default.
    pub fn image(&self, language: Language) -> String {
        self.config
            .images
            .get(language.as_str())
            .cloned()
            .unwrap_or_else(|| language.default_image().to_string())
    }

    /// Shared per-language build cache on the host, created on demand.
    ///
    /// Mounted read-write at `/workspace/.sanity-cache` in every session
    /// of that language; tasks must tolerate a shared cache.
    pub fn cache_dir(&self, language: Language) -> std::io::Result<PathBuf> {
        let root = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let dir = root.join(".sanity-cache").join(language.as_str());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Expands the configured shared mount sets.
    ///
    /// Relative entries resolve under the user's home directory. Paths
    /// that do not exist are dropped, not errors. Entries on the
    /// readable denylist are never mounted; that is the whole
    /// enforcement mechanism.
    pub fn mounts(&self) -> MountSets {
        let denylist: Vec<PathBuf> = self
            .config
            .sandbox
            .readable_denylist
            .iter()
            .map(|p| expand_home(p))
            .collect();

        let expand_set = |entries: &[String]| -> Vec<PathBuf> {
            entries
                .iter()
                .map(|p| expand_home(p))
                .filter(|path| {
                    if denylist.iter().any(|d| path.starts_with(d)) {
                        debug!(path = %path.display(), "Dropping denylisted mount");
                        return false;
                    }
                    if !path.exists() {
                        debug!(path = %path.display(), "Dropping non-existent mount");
                        return false;
                    }
                    true
                })
                .collect()
        };

        MountSets {
            writable: expand_set(&self.config.sandbox.writable_dirs),
            shared_readwrite: expand_set(&self.config.sandbox.shared_readwrite_dirs),
            shared_readonly: expand_set(&self.config.sandbox.shared_readonly_dirs),
        }
    }
}

/// Resolves a possibly-relative path under the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(p)
}

/// Host `uid:gid` for the container user mapping.
///
/// Returns `None` on platforms where the ids cannot be determined
/// (e.g. rootless or non-unix backends); the container then runs as the
/// image's default user and the session logs a warning.
pub fn host_user() -> Option<String> {
    #[cfg(unix)]
    {
        // Safety: getuid/getgid have no failure modes.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Some(format!("{uid}:{gid}"))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use tempfile::TempDir;

    #[test]
    fn test_image_default_and_override() {
        let mut config = HarnessConfig::default();
        let resolver = ImageResolver::new(&config);
        assert_eq!(resolver.image(Language::Go), "golang:1.23-bookworm");

        config
            .images
            .insert("go".to_string(), "golang:custom".to_string());
        let resolver = ImageResolver::new(&config);
        assert_eq!(resolver.image(Language::Go), "golang:custom");
        assert_eq!(resolver.image(Language::Rust), "rust:1.83-bookworm");
    }

    #[test]
    fn test_mounts_drop_missing_paths() {
        let existing = TempDir::new().unwrap();
        let writable = TempDir::new().unwrap();
        let mut config = HarnessConfig::default();
        config.sandbox.shared_readonly_dirs = vec![
            existing.path().to_string_lossy().to_string(),
            "/definitely/not/a/real/path".to_string(),
        ];
        config.sandbox.writable_dirs = vec![
            writable.path().to_string_lossy().to_string(),
            "/also/not/a/real/path".to_string(),
        ];

        let mounts = ImageResolver::new(&config).mounts();
        assert_eq!(mounts.shared_readonly, vec![existing.path().to_path_buf()]);
        assert_eq!(mounts.writable, vec![writable.path().to_path_buf()]);
        assert!(mounts.shared_readwrite.is_empty());
    }

    #[test]
    fn test_denylist_suppresses_mount() {
        let dir = TempDir::new().unwrap();
        let mut config = HarnessConfig::default();
        config.sandbox.shared_readwrite_dirs =
            vec![dir.path().to_string_lossy().to_string()];
        config.sandbox.readable_denylist = vec![dir.path().to_string_lossy().to_string()];

        let mounts = ImageResolver::new(&config).mounts();
        assert!(mounts.shared_readwrite.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_host_user_shape() {
        let user = host_user().unwrap();
        let parts: Vec<&str> = user.split(':').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].parse::<u32>().is_ok());
        assert!(parts[1].parse::<u32>().is_ok());
    }
}
