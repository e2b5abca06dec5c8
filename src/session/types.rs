//! Session and attempt records.
//!
//! Field order inside each struct is alphabetical so the serialized
//! `result.json` is byte-stable for re-hashing; timestamps carry
//! millisecond precision for the same reason.

use chrono::{DateTime, Utc};
use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::container::ExecStatus;
use crate::tasks::{Language, Task};

/// Millisecond-precision timestamp serialization.
pub mod ts_ms {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&text, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;
        use serde::Serialize;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => dt.format(FORMAT).to_string().serialize(s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let text: Option<String> = Option::deserialize(d)?;
            text.map(|t| {
                NaiveDateTime::parse_from_str(&t, FORMAT)
                    .map(|naive| naive.and_utc())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}

/// Terminal classification of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pass,
    Fail,
    Timeout,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pass => f.write_str("pass"),
            SessionStatus::Fail => f.write_str("fail"),
            SessionStatus::Timeout => f.write_str("timeout"),
            SessionStatus::Error => f.write_str("error"),
        }
    }
}

/// Run mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Practice: stubs only, watch loop allowed.
    Run,
    /// Eval: hidden tests projected, single attempt.
    Eval,
}

/// Config snapshot frozen into the session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Resolved container image.
    pub image: String,
    /// Bound on attempts.
    pub max_attempts: u32,
    pub mode: SessionMode,
    /// Per-attempt timeout in seconds.
    pub timeout_seconds: u64,
    /// Whether the session loops on workspace changes.
    pub watch: bool,
}

/// One invocation of the task's test command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Deduplicated high-signal diagnostic lines.
    pub error_summary: Vec<String>,
    /// Exit code; `None` when the attempt timed out.
    pub exit_code: Option<i64>,
    /// 1-based dense attempt number.
    pub number: u32,
    pub passed: bool,
    /// Merged stdout+stderr; persisted to `logs/attempt-N.log`, not
    /// into `result.json`.
    #[serde(skip)]
    pub raw_output: Vec<u8>,
    #[serde(with = "ts_ms")]
    pub timestamp: DateTime<Utc>,
}

impl Attempt {
    /// Builds an attempt record from an exec outcome.
    pub fn from_exec(
        number: u32,
        status: ExecStatus,
        raw_output: Vec<u8>,
        duration_ms: u64,
        error_summary: Vec<String>,
    ) -> Self {
        let (exit_code, passed) = match status {
            ExecStatus::Exited(code) => (Some(code), code == 0),
            ExecStatus::TimedOut => (None, false),
        };
        Self {
            duration_ms,
            error_summary,
            exit_code,
            number,
            passed,
            raw_output,
            timestamp: Utc::now(),
        }
    }

    /// Status this attempt would give a session that ends on it.
    pub fn classification(&self) -> SessionStatus {
        if self.passed {
            SessionStatus::Pass
        } else if self.exit_code.is_none() {
            SessionStatus::Timeout
        } else {
            SessionStatus::Fail
        }
    }
}

/// One end-to-end execution of a task against a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub attempts: Vec<Attempt>,
    #[serde(with = "ts_ms::option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub config: SessionConfig,
    /// Terminal error message when `status == error`.
    pub error: Option<String>,
    pub id: String,
    pub language: Language,
    pub slug: String,
    #[serde(with = "ts_ms")]
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl Session {
    /// Creates a fresh session for a task.
    pub fn new(task: &Task, config: SessionConfig) -> Self {
        Self {
            attempts: Vec::new(),
            completed_at: None,
            config,
            error: None,
            id: session_id(task.language, &task.slug),
            language: task.language,
            slug: task.slug.clone(),
            started_at: Utc::now(),
            status: SessionStatus::Error,
        }
    }

    /// Appends an attempt, keeping the numbering dense from 1.
    pub fn push_attempt(&mut self, attempt: Attempt) {
        debug_assert_eq!(attempt.number as usize, self.attempts.len() + 1);
        self.attempts.push(attempt);
    }

    /// Next attempt number.
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    /// Whether any attempt passed.
    pub fn passed(&self) -> bool {
        self.attempts.iter().any(|a| a.passed)
    }

    /// Seals the session: pass if any attempt passed, otherwise the
    /// classification of the terminal attempt; `error` when no attempt
    /// ever ran.
    pub fn finish(&mut self) {
        self.status = if self.passed() {
            SessionStatus::Pass
        } else {
            self.attempts
                .last()
                .map(Attempt::classification)
                .unwrap_or(SessionStatus::Error)
        };
        self.completed_at = Some(Utc::now());
    }

    /// Seals the session as an infrastructure error.
    pub fn finish_error(&mut self, message: impl Into<String>) {
        self.status = SessionStatus::Error;
        self.error = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn reference(&self) -> String {
        format!("{}/{}", self.language, self.slug)
    }
}

/// Generates `<language>-<slug>-<timestamp>-<random8>`.
///
/// The random suffix defeats collisions when many sessions start within
/// the same second.
pub fn session_id(language: Language, slug: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: u32 = rand::rng().random();
    format!("{language}-{slug}-{timestamp}-{suffix:08x}")
}
