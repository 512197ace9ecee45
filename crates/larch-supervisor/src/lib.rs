//! LARCH Supervisor - External collaborator interfaces
//!
//! The deployment core reaches everything outside itself through the traits
//! in this crate:
//!
//! - **ServiceGraph**: the service supervisor (service lifecycle, the
//!   effective-config tree, restart requests)
//! - **ComponentManager**: the package manager (dependency resolution,
//!   artifact preparation, runtime-config resolution)
//! - **UpdateCoordinator**: the safety service that picks the moment a
//!   config swap is acceptable
//! - **BootstrapManager**: pre/post-restart bookkeeping for host-agent
//!   self-updates
//! - **FleetInventory**: best-effort cloud group refresh
//!
//! In-memory implementations are provided for development and testing;
//! production wiring supplies the real supervisor and package manager
//! behind the same traits.

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod cancel;
pub mod component;
pub mod error;
pub mod fleet;
pub mod memory;
pub mod safety;
pub mod service;

// Re-exports
pub use bootstrap::{BootstrapManager, BootstrapTask};
pub use cancel::CancelToken;
pub use component::{ComponentIdentifier, ComponentManager, ComponentManagerError};
pub use error::{Result, SupervisorError};
pub use fleet::{FleetInventory, FleetInventoryError};
pub use memory::{
    InMemoryBootstrapManager, InMemoryComponentManager, InMemoryFleetInventory,
    InMemoryServiceGraph, InMemoryUpdateCoordinator,
};
pub use safety::{UpdateCoordinator, UpdateWindowRequest, WindowGrant};
pub use service::{ServiceConfigMap, ServiceGraph, ServiceSnapshot, ServiceState};
