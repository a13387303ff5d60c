#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod core;
pub mod diff;
mod error;
mod executor;
#[cfg(test)]
mod fixtures;
mod graph;
mod keystore;
mod lifecycle;
mod plan;
mod report;
mod target;
mod task;

pub use crate::core::{Cancellation, RunContext};
pub use crate::diff::ChangeSet;
pub use crate::error::{EngineError, StepError, TaskError};
pub use crate::executor::{Executor, RunOptions, TaskSet};
pub use crate::keystore::{
    Certificate, CertificatePool, Keyset, KeysetItem, Keystore, MemoryKeystore, PrivateKey,
};
pub use crate::lifecycle::Lifecycle;
pub use crate::plan::Plan;
pub use crate::report::{RunReport, TaskStatus};
pub use crate::target::{ApiTarget, Attr, HclTarget, Literal, ManifestTarget, Target};
pub use crate::task::{Action, Outcome, Phase, Render, Resource, TaskKey};

/// Install a global tracing subscriber with progress-bar aware output.
///
/// Filtering follows `RUST_LOG`, defaulting to `info` for this crate. Call
/// at most once, early in the program.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let indicatif = tracing_indicatif::IndicatifLayer::new();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("updraft=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif.get_stderr_writer())
                .without_time(),
        )
        .with(indicatif)
        .init();
}
