//! The task contracts at the heart of the engine.
//!
//! A *task value* is a plain declarative record describing one desired
//! infrastructure resource. Catalog authors implement the typed [`Resource`]
//! trait once per kind, plus one [`Render`] impl per backend the kind
//! supports. The engine itself only ever sees the type-erased [`Task`]
//! trait, produced by a blanket impl. This is where the erasure happens,
//! mirroring how the graph stores heterogeneous outputs behind one vtable.
//!
//! Convergence of a single task runs three ordered steps:
//!
//! 1. **Discover**: [`Resource::find`] reads actual state (`None` if the
//!    resource does not exist yet).
//! 2. **Validate + Diff**: [`Resource::diff`] computes expected minus
//!    actual, then [`Resource::check_changes`] rejects contract violations.
//! 3. **Apply**: [`Render::render`] performs the side effect against the
//!    active target. Side effects occur in this step only.

use std::fmt::Debug;

use crate::core::{ArcStr, RunContext};
use crate::diff::ChangeSet;
use crate::error::{StepError, TaskError};
use crate::lifecycle::Lifecycle;
use crate::target::Target;

/// Structural identity of a task: kind plus human-readable name.
///
/// Diffing and dependency resolution key on this pair; there is no
/// synthetic object ID anywhere in the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub kind: &'static str,
    pub name: ArcStr,
}

impl TaskKey {
    pub fn new(kind: &'static str, name: impl AsRef<str>) -> Self {
        Self {
            kind,
            name: ArcStr::from(name.as_ref()),
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The convergence step a task was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discover,
    Diff,
    Apply,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Discover => "discover",
            Phase::Diff => "diff",
            Phase::Apply => "apply",
        };
        f.write_str(s)
    }
}

/// Whether an apply creates the resource or updates it in place.
///
/// There is no delete action in this contract; deletions are handled by a
/// separate collaborator outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Update => f.write_str("update"),
        }
    }
}

/// Terminal result of converging one task successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Actual state already matched desired state; nothing was rendered.
    Unchanged,
    /// Changes were rendered against the active target.
    Applied { action: Action, summary: String },
    /// Plan mode: changes were computed but deliberately not rendered.
    Planned { action: Action, summary: String },
    /// A validate-only lifecycle found the resource in the desired state.
    Validated,
    /// A warn-on-drift lifecycle found drift; it was warned, not applied.
    Drifted { summary: String },
    /// Discovery was skipped under `WarnIfInsufficientAccess`.
    Skipped { reason: String },
}

/// Whether a run performs side effects or stops after diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    Apply,
    Plan,
}

/// One declarative resource kind.
///
/// `diff` and `check_changes` are pure and non-blocking; only `find` may
/// touch the network. The `changes` value produced by `diff` has exactly
/// the fields that differ set; unset fields mean "no change requested".
pub trait Resource: Clone + Debug + Send + Sync + Sized + 'static {
    /// Stable kind identifier, e.g. `"Route"`. Part of task identity.
    const KIND: &'static str;

    /// Human-readable name. May be absent only before graph assembly;
    /// an unnamed task at graph-build time is a configuration error.
    fn name(&self) -> Option<&str>;

    fn lifecycle(&self) -> Lifecycle;

    fn set_lifecycle(&mut self, lifecycle: Lifecycle);

    /// The other tasks this value references. Each kind lists its own
    /// references explicitly; the engine recomputes the edges every run.
    /// Missing a reference here breaks read-your-writes ordering, so kinds
    /// must report every field that is itself a task value.
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Read actual state from the provider. `Ok(None)` means the resource
    /// does not exist; errors are reserved for unexpected failures.
    fn find(&self, ctx: &RunContext) -> Result<Option<Self>, TaskError>;

    /// Expected minus actual, field by field. Only called when actual
    /// state exists; on first creation the changes are the full desired
    /// value.
    fn diff(&self, actual: &Self) -> Self;

    /// True when no fields are set in `changes`.
    fn is_empty(changes: &Self) -> bool;

    /// Validate the (actual, expected, changes) triple. Returns a
    /// required-field error when a mandatory field is unset on creation, a
    /// cannot-change-field error when an immutable field differs, or a
    /// generic validation error for any other constraint violation.
    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &Self,
    ) -> Result<(), TaskError>;

    /// Diagnostic one-liner for a changes value. Purely informational.
    fn describe(changes: &Self) -> String {
        format!("{changes:?}")
    }
}

/// Rendering capability of a resource kind for one specific backend.
///
/// Absent `actual` means create; present means update in place. Render
/// methods may perform network or file I/O but must not touch the engine's
/// bookkeeping; the dependency graph is owned by the executor alone.
pub trait Render<T: Target>: Resource {
    fn render(
        &self,
        target: &T,
        actual: Option<&Self>,
        changes: &Self,
        ctx: &RunContext,
    ) -> Result<(), TaskError>;
}

/// The type-erased task the engine schedules.
///
/// Catalog code never implements this directly; the blanket impl below
/// bridges from the typed traits, resolving the full capability set
/// {find, check_changes, render} for the selected target at compile time.
/// A kind lacking a [`Render`] impl for the target cannot be registered,
/// which is the fail-fast guarantee for missing render methods.
pub(crate) trait Task<T: Target>: Send + Sync {
    fn kind(&self) -> &'static str;

    fn name(&self) -> Option<ArcStr>;

    fn lifecycle(&self) -> Lifecycle;

    fn dependencies(&self) -> Vec<TaskKey>;

    /// Drive this task through discover, diff, and (in apply mode) render.
    fn converge(&self, ctx: &RunContext, target: &T, mode: RunMode)
    -> Result<Outcome, StepError>;
}

impl<T, R> Task<T> for R
where
    T: Target,
    R: Resource + Render<T>,
{
    fn kind(&self) -> &'static str {
        R::KIND
    }

    fn name(&self) -> Option<ArcStr> {
        Resource::name(self).map(ArcStr::from)
    }

    fn lifecycle(&self) -> Lifecycle {
        Resource::lifecycle(self)
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        Resource::dependencies(self)
    }

    fn converge(
        &self,
        ctx: &RunContext,
        target: &T,
        mode: RunMode,
    ) -> Result<Outcome, StepError> {
        let lifecycle = Resource::lifecycle(self);

        // Discover
        let mut actual = match self.find(ctx) {
            Ok(actual) => actual,
            Err(error) if lifecycle == Lifecycle::WarnIfInsufficientAccess => {
                tracing::warn!(
                    kind = R::KIND,
                    name = Resource::name(self),
                    "skipping task, discovery failed: {error}"
                );
                return Ok(Outcome::Skipped {
                    reason: error.to_string(),
                });
            }
            Err(error) => return Err(StepError::new(Phase::Discover, error)),
        };

        // The lifecycle is never a diffable field.
        if let Some(actual) = actual.as_mut() {
            actual.set_lifecycle(lifecycle);
        }

        match lifecycle {
            Lifecycle::ExistsAndValidates => match &actual {
                None => Err(StepError::new(
                    Phase::Discover,
                    TaskError::validation("resource must already exist"),
                )),
                Some(found) => {
                    let changes = self.diff(found);
                    if R::is_empty(&changes) {
                        Ok(Outcome::Validated)
                    } else {
                        Err(StepError::new(
                            Phase::Diff,
                            TaskError::validation(format!(
                                "resource has drifted from desired state: {}",
                                R::describe(&changes)
                            )),
                        ))
                    }
                }
            },
            Lifecycle::ExistsAndWarnIfChanges => match &actual {
                None => {
                    tracing::warn!(
                        kind = R::KIND,
                        name = Resource::name(self),
                        "expected resource is missing"
                    );
                    Ok(Outcome::Drifted {
                        summary: String::from("resource is missing"),
                    })
                }
                Some(found) => {
                    let changes = self.diff(found);
                    if R::is_empty(&changes) {
                        Ok(Outcome::Validated)
                    } else {
                        let summary = R::describe(&changes);
                        tracing::warn!(
                            kind = R::KIND,
                            name = Resource::name(self),
                            "resource has drifted from desired state: {summary}"
                        );
                        Ok(Outcome::Drifted { summary })
                    }
                }
            },
            // Discovery succeeded; nothing may be mutated under this policy.
            Lifecycle::WarnIfInsufficientAccess => Ok(Outcome::Validated),
            Lifecycle::Sync => {
                let set = ChangeSet::new(actual, self.clone());

                R::check_changes(set.actual.as_ref(), &set.expected, &set.changes)
                    .map_err(|error| StepError::new(Phase::Diff, error))?;

                if set.is_empty() {
                    return Ok(Outcome::Unchanged);
                }

                let action = match set.actual {
                    Some(_) => Action::Update,
                    None => Action::Create,
                };
                let summary = R::describe(&set.changes);

                match mode {
                    RunMode::Plan => Ok(Outcome::Planned { action, summary }),
                    RunMode::Apply => {
                        self.render(target, set.actual.as_ref(), &set.changes, ctx)
                            .map_err(|error| StepError::new(Phase::Apply, error))?;
                        Ok(Outcome::Applied { action, summary })
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Cloud, RecordingTarget, Subnet};

    fn converge(subnet: &Subnet, cloud: &Cloud) -> Result<Outcome, StepError> {
        let ctx = RunContext::new();
        let target = RecordingTarget::new(cloud.clone());
        Task::converge(&subnet.clone().on(cloud), &ctx, &target, RunMode::Apply)
    }

    #[test]
    fn key_ordering_is_kind_then_name() {
        let a = TaskKey::new("Network", "z");
        let b = TaskKey::new("Subnet", "a");
        assert!(a < b);
        assert_eq!(a.to_string(), "Network/z");
    }

    #[test]
    fn creates_when_absent() {
        let cloud = Cloud::default();
        let subnet = Subnet::new("a").cidr("10.0.0.0/24");

        let outcome = converge(&subnet, &cloud).unwrap();
        assert!(matches!(
            outcome,
            Outcome::Applied {
                action: Action::Create,
                ..
            }
        ));
        assert!(cloud.subnet("a").is_some());
    }

    #[test]
    fn second_run_is_unchanged() {
        let cloud = Cloud::default();
        let subnet = Subnet::new("a").cidr("10.0.0.0/24");

        converge(&subnet, &cloud).unwrap();
        let outcome = converge(&subnet, &cloud).unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }

    #[test]
    fn lifecycle_never_diffs() {
        let cloud = Cloud::default();
        converge(&Subnet::new("a").cidr("10.0.0.0/24"), &cloud).unwrap();

        // Discovered state carries no lifecycle of its own; the desired one
        // must be copied over before diffing.
        let desired = Subnet::new("a")
            .cidr("10.0.0.0/24")
            .with_lifecycle(Lifecycle::ExistsAndValidates);
        let outcome = converge(&desired, &cloud).unwrap();
        assert_eq!(outcome, Outcome::Validated);
    }

    #[test]
    fn validate_lifecycle_rejects_missing() {
        let cloud = Cloud::default();
        let desired = Subnet::new("ghost")
            .cidr("10.0.0.0/24")
            .with_lifecycle(Lifecycle::ExistsAndValidates);

        let err = converge(&desired, &cloud).unwrap_err();
        assert_eq!(err.phase, Phase::Discover);
    }

    #[test]
    fn warn_lifecycle_reports_drift_without_apply() {
        let cloud = Cloud::default();
        converge(&Subnet::new("a").cidr("10.0.0.0/24"), &cloud).unwrap();

        let desired = Subnet::new("a")
            .cidr("10.9.0.0/24")
            .with_lifecycle(Lifecycle::ExistsAndWarnIfChanges);
        let outcome = converge(&desired, &cloud).unwrap();
        assert!(matches!(outcome, Outcome::Drifted { .. }));

        // Actual state was not touched.
        assert_eq!(cloud.subnet("a").unwrap().cidr, Some("10.0.0.0/24".into()));
    }

    #[test]
    fn insufficient_access_is_skipped_not_failed() {
        let cloud = Cloud::default();
        let desired = Subnet::new("a")
            .cidr("10.0.0.0/24")
            .access_denied()
            .with_lifecycle(Lifecycle::WarnIfInsufficientAccess);

        let outcome = converge(&desired, &cloud).unwrap();
        assert!(matches!(outcome, Outcome::Skipped { .. }));
        // Nothing was rendered.
        assert!(cloud.subnet("a").is_none());
    }

    #[test]
    fn insufficient_access_validates_when_discovery_succeeds() {
        let cloud = Cloud::default();
        converge(&Subnet::new("a").cidr("10.0.0.0/24"), &cloud).unwrap();

        let desired = Subnet::new("a")
            .cidr("10.0.0.0/24")
            .with_lifecycle(Lifecycle::WarnIfInsufficientAccess);
        assert_eq!(converge(&desired, &cloud).unwrap(), Outcome::Validated);
    }

    #[test]
    fn discovery_error_is_fatal_without_access_lifecycle() {
        let cloud = Cloud::default();
        let desired = Subnet::new("a").cidr("10.0.0.0/24").access_denied();

        let err = converge(&desired, &cloud).unwrap_err();
        assert_eq!(err.phase, Phase::Discover);
    }

    #[test]
    fn plan_mode_never_renders() {
        let cloud = Cloud::default();
        let subnet = Subnet::new("a").cidr("10.0.0.0/24").on(&cloud);

        let ctx = RunContext::new();
        let target = RecordingTarget::new(cloud.clone());
        let outcome = Task::converge(&subnet, &ctx, &target, RunMode::Plan).unwrap();

        assert!(matches!(
            outcome,
            Outcome::Planned {
                action: Action::Create,
                ..
            }
        ));
        assert!(cloud.subnet("a").is_none());
    }
}
