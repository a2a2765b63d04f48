//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting the pipeline."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

/// Fixed-period ticker. The first tick completes immediately; late ticks are
/// delayed rather than bunched up.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    interval: tokio::time::Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { period, interval }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

enum Outcome {
    Done,
    Failed(anyhow::Error),
    TimedOut,
}

/// Counts of how the tasks of a [`TaskGroup`] finished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskReport {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl TaskReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.timed_out
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }
}

/// Group of independent tasks, each bounded by an optional deadline.
///
/// A failing or slow task never affects its siblings; failures are logged
/// under the task name and tallied in the [`TaskReport`].
#[derive(Debug)]
pub struct TaskGroup {
    label: &'static str,
    deadline: Option<Duration>,
    tasks: Vec<(String, JoinHandle<Outcome>)>,
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Done => f.write_str("Done"),
            Outcome::Failed(err) => write!(f, "Failed({err})"),
            Outcome::TimedOut => f.write_str("TimedOut"),
        }
    }
}

impl TaskGroup {
    pub fn new(label: &'static str, deadline: Option<Duration>) -> Self {
        Self {
            label,
            deadline,
            tasks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let deadline = self.deadline;
        let handle = tokio::spawn(async move {
            let result = match deadline {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => return Outcome::TimedOut,
                },
                None => fut.await,
            };
            match result {
                Ok(()) => Outcome::Done,
                Err(err) => Outcome::Failed(err),
            }
        });
        self.tasks.push((name.into(), handle));
    }

    /// Wait for every task and summarise the outcomes.
    pub async fn join(self) -> TaskReport {
        let mut report = TaskReport::default();
        for (name, handle) in self.tasks {
            match handle.await {
                Ok(Outcome::Done) => report.completed += 1,
                Ok(Outcome::Failed(err)) => {
                    warn!(group = self.label, task = %name, error = %err, "task failed");
                    report.failed += 1;
                }
                Ok(Outcome::TimedOut) => {
                    warn!(group = self.label, task = %name, "task exceeded deadline");
                    report.timed_out += 1;
                }
                Err(join_err) => {
                    warn!(group = self.label, task = %name, error = %join_err, "task aborted");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
