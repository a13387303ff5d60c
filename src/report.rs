//! Aggregate results of one convergence run.
//!
//! Failures are task-local: the run finishes every independently runnable
//! branch before reporting, and the report names, for every failed task,
//! the dependents it blocked.

use std::collections::BTreeMap;
use std::time::Duration;

use console::style;

use crate::error::StepError;
use crate::task::{Outcome, TaskKey};

/// Terminal state of one task after the run.
#[derive(Debug)]
pub enum TaskStatus {
    /// The task converged (applied, planned, validated, or unchanged).
    Done(Outcome),
    /// The task failed permanently. For an exhausted transient condition
    /// the error carries the original "try again later" reason.
    Failed { error: StepError, attempts: u32 },
    /// A dependency (possibly transitive) failed; this task never started.
    Blocked { on: TaskKey },
    /// The run was cancelled before this task could start.
    NotStarted,
}

impl TaskStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done(_))
    }
}

/// The result of one convergence run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Terminal status of every task, keyed by (kind, name).
    pub statuses: BTreeMap<TaskKey, TaskStatus>,
    /// Number of waves executed, retry waves included.
    pub waves: usize,
    pub elapsed: Duration,
    /// Whether cancellation was observed before the run completed.
    pub cancelled: bool,
    /// Error from the target's final flush, if any.
    pub finish_error: Option<String>,
}

impl RunReport {
    /// Overall success: every task reached `Done`, the run was not
    /// cancelled, and the target flushed cleanly.
    pub fn succeeded(&self) -> bool {
        !self.cancelled
            && self.finish_error.is_none()
            && self.statuses.values().all(TaskStatus::is_done)
    }

    pub fn done(&self) -> impl Iterator<Item = (&TaskKey, &Outcome)> {
        self.statuses.iter().filter_map(|(key, status)| match status {
            TaskStatus::Done(outcome) => Some((key, outcome)),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&TaskKey, &StepError)> {
        self.statuses.iter().filter_map(|(key, status)| match status {
            TaskStatus::Failed { error, .. } => Some((key, error)),
            _ => None,
        })
    }

    /// Tasks that could not run because `key` failed.
    pub fn blocked_by(&self, key: &TaskKey) -> Vec<&TaskKey> {
        self.statuses
            .iter()
            .filter_map(|(blocked, status)| match status {
                TaskStatus::Blocked { on } if on == key => Some(blocked),
                _ => None,
            })
            .collect()
    }

    /// Number of tasks whose changes were actually applied.
    pub fn applied(&self) -> usize {
        self.done()
            .filter(|(_, outcome)| matches!(outcome, Outcome::Applied { .. }))
            .count()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let done = self.done().count();
        let total = self.statuses.len();

        writeln!(
            f,
            "converged {}/{} tasks in {} waves ({:.1?})",
            style(done).green(),
            total,
            self.waves,
            self.elapsed,
        )?;

        for (key, status) in &self.statuses {
            match status {
                TaskStatus::Done(_) => {}
                TaskStatus::Failed { error, attempts } => {
                    if *attempts > 1 {
                        writeln!(
                            f,
                            "  {} {key} ({error}) after {attempts} attempts",
                            style("failed").red(),
                        )?;
                    } else {
                        writeln!(f, "  {} {key} ({error})", style("failed").red())?;
                    }
                    let blocked = self.blocked_by(key);
                    if !blocked.is_empty() {
                        let names = blocked
                            .iter()
                            .map(|k| k.to_string())
                            .collect::<Vec<_>>()
                            .join(", ");
                        writeln!(f, "      blocks: {names}")?;
                    }
                }
                TaskStatus::Blocked { .. } => {}
                TaskStatus::NotStarted => {
                    writeln!(f, "  {} {key}", style("not started").yellow())?;
                }
            }
        }

        if self.cancelled {
            writeln!(f, "  {}", style("run was cancelled").yellow())?;
        }
        if let Some(err) = &self.finish_error {
            writeln!(f, "  {} target flush failed: {err}", style("error").red())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::task::Phase;

    fn failed(phase: Phase, error: TaskError, attempts: u32) -> TaskStatus {
        TaskStatus::Failed {
            error: StepError { phase, error },
            attempts,
        }
    }

    #[test]
    fn success_requires_every_task_done() {
        let mut report = RunReport::default();
        report
            .statuses
            .insert(TaskKey::new("Network", "a"), TaskStatus::Done(Outcome::Unchanged));
        assert!(report.succeeded());

        report.statuses.insert(
            TaskKey::new("Subnet", "b"),
            failed(Phase::Apply, TaskError::validation("nope"), 1),
        );
        assert!(!report.succeeded());
    }

    #[test]
    fn report_names_blocked_dependents() {
        let mut report = RunReport::default();
        let net = TaskKey::new("Network", "a");
        report
            .statuses
            .insert(net.clone(), failed(Phase::Apply, TaskError::validation("nope"), 1));
        report.statuses.insert(
            TaskKey::new("Subnet", "b"),
            TaskStatus::Blocked { on: net.clone() },
        );

        assert_eq!(report.blocked_by(&net).len(), 1);
        let text = report.to_string();
        assert!(text.contains("blocks: Subnet/b"));
    }

    #[test]
    fn cancellation_is_not_success() {
        let mut report = RunReport::default();
        report.cancelled = true;
        assert!(!report.succeeded());
    }
}
