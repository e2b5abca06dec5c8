//! Agent evaluation: the worker-pool driver, agent invocation, and
//! weighted scoring.

pub mod agents;
mod driver;
mod score;

pub use driver::{
    render_eval_report, submission, verify_eval_dir, EvalDriver, EvalOptions, EvalRun,
    PlannedTask, Submission,
};
pub use score::{ScoreTotals, Scoreboard, TaskOutcome};
