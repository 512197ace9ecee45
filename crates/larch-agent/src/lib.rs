//! LARCH Agent - The deployment orchestrator
//!
//! A single long-running loop drains the deployment queue, allocates a
//! crash-safe workspace per deployment, normalizes the intent, drives the
//! pipeline task (or the host-agent update task after a restart), enforces
//! cancellation through the safety service, and hands every result to the
//! finisher for terminal bookkeeping.
//!
//! Exactly one deployment task is active at a time; cancellation is the
//! only concurrent interaction with it.

#![deny(unsafe_code)]

pub mod config;
pub mod events;
pub mod finisher;
pub mod orchestrator;

// Re-exports
pub use config::{AgentConfig, LoggingConfig, MergeConfig, OrchestratorConfig};
pub use events::{DeploymentEvent, DeploymentEventEnvelope};
pub use finisher::Finisher;
pub use orchestrator::DeploymentOrchestrator;
