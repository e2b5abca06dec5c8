//! Content attestation for eval output directories.
//!
//! Seals a directory into `attestation.json`: one BLAKE3-256 digest per
//! file in sorted relative-path order, plus an aggregate digest over the
//! concatenated entry digests. Verification recomputes everything and
//! fails on any mismatch, missing file, or extra file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::IntegrityError;

/// File name of the manifest, excluded from its own digests.
pub const ATTESTATION_FILE: &str = "attestation.json";

/// One attested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationEntry {
    /// Hex BLAKE3-256 of the file contents.
    pub digest: String,
    /// Path relative to the sealed directory, `/`-separated.
    pub relative_path: String,
    /// File size in bytes.
    pub size: u64,
}

/// The sealed manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    /// Hex BLAKE3-256 over the concatenated entry digests, in entry order.
    pub aggregate: String,
    /// Entries sorted by `relative_path`.
    pub entries: Vec<AttestationEntry>,
}

impl Attestation {
    /// Number of attested files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Computes the manifest for `dir` without writing it.
pub fn compute(dir: &Path) -> Result<Attestation, IntegrityError> {
    let mut entries = Vec::new();
    for (relative_path, path) in walk_sorted(dir)? {
        let contents = fs::read(&path)?;
        entries.push(AttestationEntry {
            digest: blake3::hash(&contents).to_hex().to_string(),
            relative_path,
            size: contents.len() as u64,
        });
    }
    Ok(Attestation {
        aggregate: aggregate_digest(&entries),
        entries,
    })
}

/// Seals `dir`: computes the manifest and writes `attestation.json`.
pub fn seal(dir: &Path) -> Result<Attestation, IntegrityError> {
    let attestation = compute(dir)?;
    let mut body = serde_json::to_string_pretty(&attestation)?;
    body.push('\n');
    fs::write(dir.join(ATTESTATION_FILE), body)?;
    debug!(dir = %dir.display(), files = attestation.len(), "Sealed eval directory");
    Ok(attestation)
}

/// Verifies a sealed directory against its manifest.
///
/// Fails on a digest mismatch, an attested file that disappeared, an
/// unattested file that appeared, or an aggregate mismatch; each error
/// names the offending path.
pub fn verify(dir: &Path) -> Result<(), IntegrityError> {
    let manifest_path = dir.join(ATTESTATION_FILE);
    if !manifest_path.is_file() {
        return Err(IntegrityError::NoAttestation(dir.to_path_buf()));
    }
    let recorded: Attestation = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
    let current = compute(dir)?;

    let recorded_map: BTreeMap<&str, &AttestationEntry> = recorded
        .entries
        .iter()
        .map(|e| (e.relative_path.as_str(), e))
        .collect();
    let current_map: BTreeMap<&str, &AttestationEntry> = current
        .entries
        .iter()
        .map(|e| (e.relative_path.as_str(), e))
        .collect();

    for (path, entry) in &recorded_map {
        match current_map.get(path) {
            None => {
                return Err(IntegrityError::MissingFile {
                    path: path.to_string(),
                })
            }
            Some(found) if found.digest != entry.digest || found.size != entry.size => {
                return Err(IntegrityError::Mismatch {
                    path: path.to_string(),
                });
            }
            Some(_) => {}
        }
    }
    for path in current_map.keys() {
        if !recorded_map.contains_key(path) {
            return Err(IntegrityError::ExtraFile {
                path: path.to_string(),
            });
        }
    }

    if aggregate_digest(&recorded.entries) != recorded.aggregate {
        return Err(IntegrityError::AggregateMismatch);
    }
    Ok(())
}

/// All files under `dir` except the manifest, sorted by relative path.
fn walk_sorted(dir: &Path) -> Result<Vec<(String, std::path::PathBuf)>, IntegrityError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            IntegrityError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("walkdir loop")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .expect("walked path under root")
            .to_string_lossy()
            .replace('\\', "/");
        if relative == ATTESTATION_FILE {
            continue;
        }
        files.push((relative, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn aggregate_digest(entries: &[AttestationEntry]) -> String {
    let mut hasher = blake3::Hasher::new();
    for entry in entries {
        hasher.update(entry.digest.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("go-bank-account/logs")).unwrap();
        fs::write(dir.join("summary.json"), "{\"score\": 1.0}\n").unwrap();
        fs::write(dir.join("go-bank-account/agent.log"), "agent output\n").unwrap();
        fs::write(
            dir.join("go-bank-account/logs/attempt-1.log"),
            "ok\tbank 0.01s\n",
        )
        .unwrap();
    }

    #[test]
    fn test_seal_verify_round_trip() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());

        let attestation = seal(dir.path()).unwrap();
        assert_eq!(attestation.len(), 3);
        verify(dir.path()).unwrap();
    }

    #[test]
    fn test_entries_sorted_and_exclude_manifest() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let attestation = seal(dir.path()).unwrap();

        let paths: Vec<&str> = attestation
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert!(!paths.contains(&ATTESTATION_FILE));
    }

    #[test]
    fn test_tamper_append_detected() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        seal(dir.path()).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("go-bank-account/agent.log"))
            .unwrap();
        file.write_all(b"x").unwrap();
        drop(file);

        let err = verify(dir.path()).unwrap_err();
        match err {
            IntegrityError::Mismatch { path } => {
                assert_eq!(path, "go-bank-account/agent.log");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_tamper_flip_byte_detected() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        seal(dir.path()).unwrap();

        let target = dir.path().join("summary.json");
        let mut bytes = fs::read(&target).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&target, bytes).unwrap();

        assert!(matches!(
            verify(dir.path()),
            Err(IntegrityError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_missing_and_extra_files_detected() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        seal(dir.path()).unwrap();

        fs::remove_file(dir.path().join("summary.json")).unwrap();
        assert!(matches!(
            verify(dir.path()),
            Err(IntegrityError::MissingFile { path }) if path == "summary.json"
        ));

        fs::write(dir.path().join("summary.json"), "{\"score\": 1.0}\n").unwrap();
        fs::write(dir.path().join("smuggled.txt"), "extra").unwrap();
        assert!(matches!(
            verify(dir.path()),
            Err(IntegrityError::ExtraFile { path }) if path == "smuggled.txt"
        ));
    }

    #[test]
    fn test_unsealed_directory() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        assert!(matches!(
            verify(dir.path()),
            Err(IntegrityError::NoAttestation(_))
        ));
    }
}
