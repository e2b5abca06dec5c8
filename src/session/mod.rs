//! Sessions: the data model and the runner that executes one task
//! against one container.

mod runner;
mod types;

pub use runner::{RunOptions, SessionRunner};
pub use types::{
    session_id, ts_ms, Attempt, Session, SessionConfig, SessionMode, SessionStatus,
};
