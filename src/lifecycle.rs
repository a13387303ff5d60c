/// Policy governing whether a task may be created and mutated, or only
/// validated against existing infrastructure.
///
/// The lifecycle is part of the desired state, not of the diff: before
/// diffing, the engine copies the desired lifecycle onto the discovered
/// actual state, so lifecycle itself never shows up as a changed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Create or update the resource freely to match desired state.
    #[default]
    Sync,
    /// The resource must already exist; it is validated, never mutated.
    /// Drift is a permanent failure.
    ExistsAndValidates,
    /// The resource must already exist; drift is only warned about.
    ExistsAndWarnIfChanges,
    /// Discovery errors (typically missing provider permissions) are
    /// downgraded to warnings and the task is skipped.
    WarnIfInsufficientAccess,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Lifecycle::Sync => "Sync",
            Lifecycle::ExistsAndValidates => "ExistsAndValidates",
            Lifecycle::ExistsAndWarnIfChanges => "ExistsAndWarnIfChanges",
            Lifecycle::WarnIfInsufficientAccess => "WarnIfInsufficientAccess",
        };
        f.write_str(s)
    }
}

