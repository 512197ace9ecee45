//! LARCH Deployment Engine
//!
//! The pipeline that takes a queued intent to a committed (or rolled back)
//! service graph:
//!
//! - **DeploymentQueue**: deduplicated, replacement-aware FIFO of pending
//!   intents
//! - **converter**: normalizes the three inbound intent shapes into one
//!   `DeploymentDocument`
//! - **DeploymentTask**: per-deployment pipeline (inventory refresh →
//!   dependency resolve → artifact prepare → runtime-config resolve →
//!   merge)
//! - **ConfigMerger**: service diff, safety-window gate, atomic config
//!   swap, convergence tracking, rollback
//! - **NucleusUpdateTask**: the cross-restart variant for host-agent
//!   self-updates
//!
//! The engine coordinates the process but never implements service
//! lifecycle itself; every mutation goes through the supervisor traits.

#![deny(unsafe_code)]

pub mod converter;
pub mod merge;
pub mod nucleus;
pub mod queue;
pub mod task;

// Re-exports
pub use converter::convert;
pub use merge::{
    ActivationOutcome, ActivationWatch, Activator, ConfigMerger, DefaultActivator, MergeOutcome,
    ServiceDiff,
};
pub use nucleus::{NucleusUpdateActivator, NucleusUpdateTask};
pub use queue::DeploymentQueue;
pub use task::{DeploymentTask, TaskOutcome};
