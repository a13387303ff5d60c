use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::keystore::Keystore;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = std::sync::Arc<str>;

/// A cooperative cancellation flag for one convergence run.
///
/// Cloning is cheap; all clones observe the same flag. The executor checks
/// it between waves; in-flight operations finish on their own terms, but
/// no new task starts after cancellation is observed.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run-scoped context passed to every discovery and render operation.
///
/// Carries the cancellation flag and the optional [`Keystore`] collaborator
/// that certificate-bearing task kinds consume during discover/apply. The
/// context itself holds no per-task state; each task's actual/expected/
/// changes triple is private to it.
#[derive(Clone, Default)]
pub struct RunContext {
    cancel: Cancellation,
    keystore: Option<Arc<dyn Keystore>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keystore(mut self, keystore: Arc<dyn Keystore>) -> Self {
        self.keystore = Some(keystore);
        self
    }

    /// A handle that can cancel this run from another thread.
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The externally supplied keystore, if any was configured for the run.
    pub fn keystore(&self) -> Option<&Arc<dyn Keystore>> {
        self.keystore.as_ref()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("keystore", &self.keystore.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared() {
        let ctx = RunContext::new();
        let handle = ctx.cancellation();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
    }
}
