//! Sanity harness: evaluates coding agents against compact hard
//! problems inside hermetic containers.
//!
//! The library exposes the execution engine; the `sanity` binary wires
//! it to the CLI.

pub mod cli;
pub mod config;
pub mod container;
pub mod error;
pub mod eval;
pub mod integrity;
pub mod session;
pub mod store;
pub mod summary;
pub mod tasks;
pub mod watcher;

// Re-export commonly used error types
pub use error::{
    ConfigError, ContainerError, EvalError, IntegrityError, SessionError, StoreError, TaskError,
};
