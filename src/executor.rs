//! The wave executor.
//!
//! Drives every task through discover, diff, and apply against the active
//! render target, in dependency-respecting parallel waves. Tasks inside a
//! wave run concurrently on the rayon pool, bounded by a configurable
//! ceiling; waves are strictly sequential. Tasks that signal a transient
//! ordering condition are re-queued into a later wave until the attempt
//! cap or the run deadline converts the condition into a permanent
//! failure. A permanent failure blocks the task's transitive dependents
//! but never aborts independent branches.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::RunContext;
use crate::error::{EngineError, StepError, TaskError};
use crate::graph::TaskGraph;
use crate::plan::{self, Plan};
use crate::report::{RunReport, TaskStatus};
use crate::target::Target;
use crate::task::{Outcome, Phase, Render, Resource, RunMode, Task};

/// The set of tasks for one convergence run.
///
/// Adding a resource requires a [`Render`] impl for the run's target type,
/// so a kind that cannot render against the selected backend is rejected
/// at compile time, before any task could begin applying.
pub struct TaskSet<T: Target> {
    tasks: Vec<Arc<dyn Task<T>>>,
}

impl<T: Target> TaskSet<T> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn add<R>(&mut self, resource: R) -> &mut Self
    where
        R: Resource + Render<T>,
    {
        self.tasks.push(Arc::new(resource));
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<T: Target> Default for TaskSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tuning knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Concurrency ceiling within a wave. Protects rate-limited provider
    /// APIs; must be at least 1.
    pub max_parallel: usize,
    /// Total attempts per task, first try included. A task deferring on
    /// every attempt fails after this many tries with its original
    /// transient reason.
    pub max_attempts: u32,
    /// Pause before re-running a retry wave of deferred tasks.
    pub retry_interval: Duration,
    /// Absolute budget for the whole run. On expiry, still-deferred tasks
    /// convert to failures.
    pub deadline: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            max_attempts: 5,
            retry_interval: Duration::from_secs(10),
            deadline: None,
        }
    }
}

/// Owns the validated dependency graph and drives convergence runs.
pub struct Executor<T: Target> {
    graph: TaskGraph<T>,
    options: RunOptions,
}

impl<T: Target> std::fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("graph", &self.graph)
            .field("options", &self.options)
            .finish()
    }
}

impl<T: Target> Executor<T> {
    /// Validate the task set and assemble the dependency graph.
    ///
    /// Every configuration error (duplicate tasks, unnamed tasks,
    /// references to unknown tasks, dependency cycles) is caught here,
    /// before any discovery I/O.
    pub fn new(tasks: TaskSet<T>, options: RunOptions) -> Result<Self, EngineError> {
        let graph = TaskGraph::build(tasks.tasks)?;
        Ok(Self { graph, options })
    }

    /// The static wave layering, assuming every task succeeds. For
    /// presentation; the run itself recomputes waves as tasks complete.
    pub fn execution_plan(&self) -> Plan {
        plan::to_plan(&self.graph, &plan::layers(&self.graph))
    }

    /// Converge: discover, diff, and apply every task. After the run the
    /// target's buffered output (if any) is flushed.
    pub fn run(&self, ctx: &RunContext, target: &T) -> RunReport {
        let mut report = self.run_inner(ctx, target, RunMode::Apply);
        if !report.cancelled {
            if let Err(err) = target.finish() {
                tracing::error!("target {} failed to flush: {err:#}", target.name());
                report.finish_error = Some(format!("{err:#}"));
            }
        }
        report
    }

    /// Dry run: discover and diff every task, recording what an apply
    /// would change, without performing any side effect.
    pub fn plan(&self, ctx: &RunContext, target: &T) -> RunReport {
        self.run_inner(ctx, target, RunMode::Plan)
    }

    fn run_inner(&self, ctx: &RunContext, target: &T, mode: RunMode) -> RunReport {
        let started = Instant::now();
        let deadline = self.options.deadline.map(|budget| started + budget);
        let total = self.graph.len();

        let mut statuses: Vec<Option<TaskStatus>> = (0..total).map(|_| None).collect();
        let mut attempts: Vec<u32> = vec![0; total];
        let mut remaining: Vec<usize> = self
            .graph
            .graph
            .node_indices()
            .map(|node| self.graph.dependencies_of(node).count())
            .collect();
        let mut pending: HashMap<NodeIndex, StepError> = HashMap::new();
        let mut terminal = 0usize;
        let mut reported = 0usize;
        let mut waves = 0usize;
        let mut cancelled = false;

        // Nodes are pre-sorted by (kind, name), so index order doubles as
        // the presentation tie-break.
        let mut ready: Vec<NodeIndex> = self
            .graph
            .graph
            .node_indices()
            .filter(|node| remaining[node.index()] == 0)
            .collect();
        let mut deferred: Vec<NodeIndex> = Vec::new();

        let root_span = tracing::span!(Level::INFO, "converging");
        root_span.pb_set_length(total as u64);
        root_span.pb_set_style(
            &ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        root_span.pb_set_message("Converging tasks...");
        let _enter = root_span.enter();

        while terminal < total {
            if ready.is_empty() {
                if deferred.is_empty() {
                    break;
                }
                if ctx.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let now = Instant::now();
                if let Some(deadline) = deadline
                    && now >= deadline
                {
                    // Budget spent: still-deferred tasks fail with the
                    // transient reason from their last attempt.
                    for node in deferred.drain(..) {
                        let error = pending.remove(&node).unwrap_or_else(|| {
                            StepError::new(
                                Phase::Apply,
                                TaskError::try_again_later("run deadline exceeded"),
                            )
                        });
                        fail_task(
                            &self.graph,
                            node,
                            error,
                            attempts[node.index()],
                            &mut statuses,
                            &mut terminal,
                        );
                    }
                    continue;
                }

                let mut pause = self.options.retry_interval;
                if let Some(deadline) = deadline {
                    pause = pause.min(deadline.saturating_duration_since(now));
                }
                tracing::info!(
                    "waiting {pause:?} before retrying {} deferred task(s)",
                    deferred.len()
                );
                std::thread::sleep(pause);

                ready = std::mem::take(&mut deferred);
                ready.sort_by(|a, b| self.graph.graph[*a].key.cmp(&self.graph.graph[*b].key));
                continue;
            }

            // Cancellation is only observed between waves; tasks already
            // in flight finish on their own terms.
            if ctx.is_cancelled() {
                cancelled = true;
                break;
            }

            waves += 1;
            let results = self.run_wave(&ready, ctx, target, mode);
            let mut next: Vec<NodeIndex> = Vec::new();

            for (node, result) in results {
                match result {
                    Ok(outcome) => {
                        pending.remove(&node);
                        statuses[node.index()] = Some(TaskStatus::Done(outcome));
                        terminal += 1;
                        for dependent in self.graph.dependents_of(node) {
                            remaining[dependent.index()] -= 1;
                            if remaining[dependent.index()] == 0
                                && statuses[dependent.index()].is_none()
                            {
                                next.push(dependent);
                            }
                        }
                    }
                    Err(error) if error.error.is_transient() => {
                        let tried = attempts[node.index()] + 1;
                        attempts[node.index()] = tried;
                        if tried >= self.options.max_attempts {
                            fail_task(
                                &self.graph,
                                node,
                                error,
                                tried,
                                &mut statuses,
                                &mut terminal,
                            );
                        } else {
                            tracing::info!(
                                task = %self.graph.graph[node].key,
                                attempt = tried,
                                "deferring task: {}",
                                error.error,
                            );
                            pending.insert(node, error);
                            deferred.push(node);
                        }
                    }
                    Err(error) => {
                        let tried = attempts[node.index()] + 1;
                        attempts[node.index()] = tried;
                        fail_task(&self.graph, node, error, tried, &mut statuses, &mut terminal);
                    }
                }
            }

            root_span.pb_inc((terminal - reported) as u64);
            reported = terminal;

            next.sort_by(|a, b| self.graph.graph[*a].key.cmp(&self.graph.graph[*b].key));
            ready = next;
        }

        if cancelled {
            // Deferred tasks already failed transiently and will not be
            // retried; everything else simply never started.
            for node in deferred.drain(..) {
                let error = pending.remove(&node).unwrap_or_else(|| {
                    StepError::new(Phase::Apply, TaskError::try_again_later("run cancelled"))
                });
                statuses[node.index()] = Some(TaskStatus::Failed {
                    error,
                    attempts: attempts[node.index()],
                });
            }
        }

        let statuses = self
            .graph
            .graph
            .node_indices()
            .map(|node| {
                let key = self.graph.graph[node].key.clone();
                let status = statuses[node.index()]
                    .take()
                    .unwrap_or(TaskStatus::NotStarted);
                (key, status)
            })
            .collect();

        RunReport {
            statuses,
            waves,
            elapsed: started.elapsed(),
            cancelled,
            finish_error: None,
        }
    }

    /// Run one wave with bounded parallelism on the rayon pool.
    ///
    /// The main thread sits in the receive loop while workers converge
    /// tasks; a worker slot is refilled as soon as a result arrives, so at
    /// most `max_parallel` tasks are in flight at any moment.
    fn run_wave(
        &self,
        wave: &[NodeIndex],
        ctx: &RunContext,
        target: &T,
        mode: RunMode,
    ) -> Vec<(NodeIndex, Result<Outcome, StepError>)> {
        let ceiling = self.options.max_parallel.max(1);
        let task_style = ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap();

        let mut results = Vec::with_capacity(wave.len());

        rayon::scope(|s| {
            let (sender, receiver) = channel::<(NodeIndex, Result<Outcome, StepError>)>();

            let spawn_task = |node: NodeIndex| {
                let node_data = &self.graph.graph[node];
                let key = node_data.key.clone();
                let task = Arc::clone(&node_data.task);
                let sender = sender.clone();
                let task_style = task_style.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", name = %key);
                    span.pb_set_style(&task_style);
                    span.pb_set_message(&format!("Converging {key}"));
                    let _enter = span.enter();

                    // A buggy resource kind must never take the whole run
                    // down; panics become task-local permanent failures.
                    let result =
                        match catch_unwind(AssertUnwindSafe(|| task.converge(ctx, target, mode))) {
                            Ok(result) => result,
                            Err(panic) => {
                                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                                    format!("task panicked: {s}")
                                } else if let Some(s) = panic.downcast_ref::<String>() {
                                    format!("task panicked: {s}")
                                } else {
                                    String::from("task panicked")
                                };
                                Err(StepError::new(
                                    Phase::Apply,
                                    TaskError::Provider(anyhow::anyhow!(msg)),
                                ))
                            }
                        };

                    sender.send((node, result)).unwrap();
                });
            };

            let mut queue = wave.iter().copied();
            let mut in_flight = 0;

            while in_flight < ceiling {
                match queue.next() {
                    Some(node) => {
                        spawn_task(node);
                        in_flight += 1;
                    }
                    None => break,
                }
            }

            while results.len() < wave.len() {
                let completed = receiver.recv().unwrap();
                results.push(completed);
                if let Some(node) = queue.next() {
                    spawn_task(node);
                }
            }
        });

        results
    }
}

/// Mark a task permanently failed and block its transitive dependents.
/// Independent branches of the graph are untouched.
fn fail_task<T: Target>(
    graph: &TaskGraph<T>,
    node: NodeIndex,
    error: StepError,
    attempts: u32,
    statuses: &mut [Option<TaskStatus>],
    terminal: &mut usize,
) {
    let key = graph.graph[node].key.clone();
    tracing::error!(task = %key, "task failed: {error}");

    statuses[node.index()] = Some(TaskStatus::Failed { error, attempts });
    *terminal += 1;

    let mut dfs = Dfs::new(&graph.graph, node);
    while let Some(dependent) = dfs.next(&graph.graph) {
        if dependent == node {
            continue;
        }
        if statuses[dependent.index()].is_none() {
            statuses[dependent.index()] = Some(TaskStatus::Blocked { on: key.clone() });
            *terminal += 1;
        }
    }
}
