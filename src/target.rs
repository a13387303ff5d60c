//! Render backends.
//!
//! A target is the capability that turns a task's (actual, expected,
//! changes) triple into an effect: a direct provider API call, or a line in
//! a generated infrastructure-as-code file. Exactly one target is selected
//! per run; each resource kind implements [`Render`](crate::Render) once
//! per target it supports, and the executor dispatches to the matching impl
//! through the type-erased task table.

mod hcl;
mod manifest;

pub use hcl::{Attr, HclTarget, Literal};
pub use manifest::ManifestTarget;

/// A render backend selected once per convergence run.
///
/// Targets may buffer output internally (the file emitters do); buffered
/// state must be safe for concurrent use, since tasks within a wave render
/// concurrently.
pub trait Target: Send + Sync {
    /// Short backend identifier used in logs.
    fn name(&self) -> &'static str;

    /// Flush any buffered output. The executor calls this once after an
    /// apply run completes; direct targets have nothing to flush.
    fn finish(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Applies changes directly against a provider API.
///
/// The client is an opaque capability object supplied by the caller: a
/// connection pool, an SDK handle, a fake for tests. It must be safe for
/// concurrent use; that contract belongs to the collaborator, not the
/// engine.
pub struct ApiTarget<C> {
    pub cloud: C,
}

impl<C> ApiTarget<C> {
    pub fn new(cloud: C) -> Self {
        Self { cloud }
    }
}

impl<C: Send + Sync> Target for ApiTarget<C> {
    fn name(&self) -> &'static str {
        "direct"
    }
}
