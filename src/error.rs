//! Error types for harness operations.
//!
//! One enum per subsystem:
//! - Config file loading and validation
//! - Task registry and workspace projection
//! - Container backend operations
//! - Session execution
//! - Result persistence
//! - Attestation and verification

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed config file '{path}': {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the task registry.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Slug '{slug}' is ambiguous, matches: {matches}")]
    Ambiguous { slug: String, matches: String },

    #[error("Unknown language '{0}'")]
    UnknownLanguage(String),

    #[error("Invalid task descriptor '{path}': {message}")]
    InvalidDescriptor { path: String, message: String },

    #[error("Invalid file path '{path}' in task '{task}': {message}")]
    InvalidPath {
        task: String,
        path: String,
        message: String,
    },

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a container backend.
///
/// Exec timeouts and nonzero exits are *outcomes*, carried in
/// [`crate::container::ExecStatus`](crate::container::ExecStatus), not
/// errors. Everything here escalates past the attempt loop.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Image '{image}' is not available locally and auto_pull is disabled")]
    ImageUnavailable { image: String },

    #[error("Failed to pull image '{image}': {message}")]
    PullFailed { image: String, message: String },

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("Container backend error: {0}")]
    Backend(String),

    #[error("Container '{id}' not found")]
    NotFound { id: String },

    #[error("Backend daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that terminate a session with status `error`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Workspace IO error: {0}")]
    Workspace(String),

    #[error("Container startup failed twice: {0}")]
    ContainerStartExhausted(String),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while persisting session or eval artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while sealing or verifying an eval directory.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Digest mismatch for '{path}'")]
    Mismatch { path: String },

    #[error("Attested file missing: '{path}'")]
    MissingFile { path: String },

    #[error("Unattested extra file: '{path}'")]
    ExtraFile { path: String },

    #[error("Aggregate digest mismatch")]
    AggregateMismatch,

    #[error("No attestation found in '{0}'")]
    NoAttestation(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the eval driver outside of any single session.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("Agent invocation failed: {0}")]
    AgentFailed(String),

    #[error("No tasks match the requested filter")]
    NoTasks,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
