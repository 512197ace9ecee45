//! In-memory implementations of the collaborator traits.
//!
//! These are suitable for development and testing. Production wiring
//! supplies the real supervisor and package manager behind the same traits.

use crate::bootstrap::{BootstrapManager, BootstrapTask};
use crate::cancel::CancelToken;
use crate::component::{ComponentIdentifier, ComponentManager, ComponentManagerError};
use crate::error::{Result, SupervisorError};
use crate::fleet::{FleetInventory, FleetInventoryError};
use crate::safety::{UpdateCoordinator, UpdateWindowRequest, WindowGrant};
use crate::service::{ServiceConfigMap, ServiceGraph, ServiceSnapshot, ServiceState};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use larch_types::{DeploymentDocument, DeploymentId, GroupToRoots};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Clone)]
struct ServiceRecord {
    config: serde_json::Value,
    snapshot: ServiceSnapshot,
    hard_dependencies: Vec<String>,
}

/// In-memory service supervisor.
///
/// With auto-convergence on (the default), services added or started
/// through the graph immediately report `Running` at their desired state;
/// tests flip it off to script broken services and timeouts.
pub struct InMemoryServiceGraph {
    services: DashMap<String, ServiceRecord>,
    auto_converge: AtomicBool,
    restart_requests: AtomicU32,
    start_requests: Mutex<Vec<String>>,
    reinstall_requests: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
}

impl InMemoryServiceGraph {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            auto_converge: AtomicBool::new(true),
            restart_requests: AtomicU32::new(0),
            start_requests: Mutex::new(Vec::new()),
            reinstall_requests: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    /// Control whether graph mutations settle services automatically.
    pub fn set_auto_converge(&self, on: bool) {
        self.auto_converge.store(on, Ordering::SeqCst);
    }

    /// Install a service already running at its desired state.
    pub fn install(&self, name: impl Into<String>, config: serde_json::Value) {
        let name = name.into();
        self.services.insert(
            name.clone(),
            ServiceRecord {
                config,
                snapshot: ServiceSnapshot {
                    name,
                    state: ServiceState::Running,
                    state_mod_time: Utc::now(),
                    reached_desired_state: true,
                    should_auto_start: true,
                    builtin: false,
                    startup_timeout: Duration::from_secs(120),
                },
                hard_dependencies: Vec::new(),
            },
        );
    }

    /// Force a service's reported state.
    pub fn set_state(&self, name: &str, state: ServiceState, reached_desired_state: bool) {
        if let Some(mut record) = self.services.get_mut(name) {
            record.snapshot.state = state;
            record.snapshot.reached_desired_state = reached_desired_state;
            record.snapshot.state_mod_time = Utc::now();
        }
    }

    /// Mark a service built-in.
    pub fn set_builtin(&self, name: &str, builtin: bool) {
        if let Some(mut record) = self.services.get_mut(name) {
            record.snapshot.builtin = builtin;
        }
    }

    /// Control whether a service auto-starts.
    pub fn set_auto_start(&self, name: &str, auto_start: bool) {
        if let Some(mut record) = self.services.get_mut(name) {
            record.snapshot.should_auto_start = auto_start;
        }
    }

    /// Set a service's declared startup timeout.
    pub fn set_startup_timeout(&self, name: &str, timeout: Duration) {
        if let Some(mut record) = self.services.get_mut(name) {
            record.snapshot.startup_timeout = timeout;
        }
    }

    /// Set a service's direct hard dependencies.
    pub fn set_hard_dependencies(&self, name: &str, deps: Vec<String>) {
        if let Some(mut record) = self.services.get_mut(name) {
            record.hard_dependencies = deps;
        }
    }

    /// Services asked to start, in call order.
    pub fn start_requests(&self) -> Vec<String> {
        self.start_requests.lock().unwrap().clone()
    }

    /// Services asked to reinstall, in call order.
    pub fn reinstall_requests(&self) -> Vec<String> {
        self.reinstall_requests.lock().unwrap().clone()
    }

    /// Services closed, in call order.
    pub fn closed_services(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    /// Number of host-agent restarts requested.
    pub fn restart_requests(&self) -> u32 {
        self.restart_requests.load(Ordering::SeqCst)
    }

    fn auto_converging(&self) -> bool {
        self.auto_converge.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryServiceGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceGraph for InMemoryServiceGraph {
    async fn service_names(&self) -> Result<Vec<String>> {
        Ok(self.services.iter().map(|e| e.key().clone()).collect())
    }

    async fn current_config(&self) -> Result<ServiceConfigMap> {
        Ok(self
            .services
            .iter()
            .map(|e| (e.key().clone(), e.value().config.clone()))
            .collect())
    }

    async fn status(&self, name: &str) -> Result<ServiceSnapshot> {
        self.services
            .get(name)
            .map(|r| r.snapshot.clone())
            .ok_or_else(|| SupervisorError::ServiceNotFound(name.to_string()))
    }

    async fn hard_dependencies(&self, name: &str) -> Result<Vec<String>> {
        self.services
            .get(name)
            .map(|r| r.hard_dependencies.clone())
            .ok_or_else(|| SupervisorError::ServiceNotFound(name.to_string()))
    }

    async fn request_start(&self, name: &str) -> Result<()> {
        self.start_requests.lock().unwrap().push(name.to_string());
        if self.auto_converging() {
            self.set_state(name, ServiceState::Running, true);
        }
        Ok(())
    }

    async fn request_reinstall(&self, name: &str) -> Result<()> {
        self.reinstall_requests.lock().unwrap().push(name.to_string());
        if self.auto_converging() {
            self.set_state(name, ServiceState::Running, true);
        }
        Ok(())
    }

    async fn close(&self, name: &str) -> Result<()> {
        self.closed.lock().unwrap().push(name.to_string());
        self.set_state(name, ServiceState::Finished, false);
        Ok(())
    }

    async fn replace_config(&self, target: &ServiceConfigMap) -> Result<()> {
        for (name, config) in target {
            match self.services.get_mut(name) {
                Some(mut record) => {
                    record.config = config.clone();
                }
                None => {
                    let settled = self.auto_converging();
                    self.services.insert(
                        name.clone(),
                        ServiceRecord {
                            config: config.clone(),
                            snapshot: ServiceSnapshot {
                                name: name.clone(),
                                state: if settled {
                                    ServiceState::Running
                                } else {
                                    ServiceState::New
                                },
                                state_mod_time: Utc::now(),
                                reached_desired_state: settled,
                                should_auto_start: true,
                                builtin: false,
                                startup_timeout: Duration::from_secs(120),
                            },
                            hard_dependencies: Vec::new(),
                        },
                    );
                }
            }
        }
        debug!(services = target.len(), "Replaced service configuration");
        Ok(())
    }

    async fn remove_service_config(&self, name: &str) -> Result<()> {
        self.services.remove(name);
        Ok(())
    }

    async fn write_effective_config(&self, path: &Path) -> Result<()> {
        let config = self.current_config().await?;
        let rendered = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    async fn request_restart(&self, _grace: Duration) -> Result<()> {
        self.restart_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory package manager.
///
/// Resolution returns the document roots plus any scripted dependencies;
/// failures are scripted per step with `fail_next_*`.
pub struct InMemoryComponentManager {
    resolve_failures: Mutex<VecDeque<ComponentManagerError>>,
    prepare_failures: Mutex<VecDeque<ComponentManagerError>>,
    config_failures: Mutex<VecDeque<ComponentManagerError>>,
    dependencies: DashMap<String, Vec<ComponentIdentifier>>,
    prepare_delay: Mutex<Option<Duration>>,
    resolve_calls: AtomicU32,
}

impl InMemoryComponentManager {
    pub fn new() -> Self {
        Self {
            resolve_failures: Mutex::new(VecDeque::new()),
            prepare_failures: Mutex::new(VecDeque::new()),
            config_failures: Mutex::new(VecDeque::new()),
            dependencies: DashMap::new(),
            prepare_delay: Mutex::new(None),
            resolve_calls: AtomicU32::new(0),
        }
    }

    /// Script a failure for the next dependency resolution.
    pub fn fail_next_resolve(&self, err: ComponentManagerError) {
        self.resolve_failures.lock().unwrap().push_back(err);
    }

    /// Script a failure for the next package preparation.
    pub fn fail_next_prepare(&self, err: ComponentManagerError) {
        self.prepare_failures.lock().unwrap().push_back(err);
    }

    /// Script a failure for the next runtime-config resolution.
    pub fn fail_next_config(&self, err: ComponentManagerError) {
        self.config_failures.lock().unwrap().push_back(err);
    }

    /// Declare a dependency pulled in by a root component.
    pub fn add_dependency(&self, root: &str, dep: ComponentIdentifier) {
        self.dependencies.entry(root.to_string()).or_default().push(dep);
    }

    /// Make preparation take this long (observing cancellation).
    pub fn set_prepare_delay(&self, delay: Duration) {
        *self.prepare_delay.lock().unwrap() = Some(delay);
    }

    /// How many times resolution ran.
    pub fn resolve_calls(&self) -> u32 {
        self.resolve_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryComponentManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComponentManager for InMemoryComponentManager {
    async fn resolve_dependencies(
        &self,
        document: &DeploymentDocument,
        _group_to_roots: &GroupToRoots,
    ) -> std::result::Result<Vec<ComponentIdentifier>, ComponentManagerError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.resolve_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut resolved = Vec::new();
        for root in &document.root_components {
            resolved.push(ComponentIdentifier::new(&root.name, root.version.clone()));
            if let Some(deps) = self.dependencies.get(&root.name) {
                for dep in deps.iter() {
                    if !resolved.contains(dep) {
                        resolved.push(dep.clone());
                    }
                }
            }
        }
        Ok(resolved)
    }

    async fn prepare_packages(
        &self,
        _components: &[ComponentIdentifier],
        cancel: &CancelToken,
    ) -> std::result::Result<(), ComponentManagerError> {
        if let Some(err) = self.prepare_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let delay = *self.prepare_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ComponentManagerError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(ComponentManagerError::Cancelled);
        }
        Ok(())
    }

    async fn resolve_runtime_config(
        &self,
        components: &[ComponentIdentifier],
        document: &DeploymentDocument,
        _current_roots: &[String],
    ) -> std::result::Result<ServiceConfigMap, ComponentManagerError> {
        if let Some(err) = self.config_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut map = ServiceConfigMap::new();
        for component in components {
            let mut entry = serde_json::json!({ "version": component.version.to_string() });
            if let Some(update) = document.configuration_updates.get(&component.name) {
                if let Some(merge) = &update.merge {
                    entry["configuration"] = merge.clone();
                }
            }
            map.insert(component.name.clone(), entry);
        }
        Ok(map)
    }
}

/// In-memory safety coordinator.
///
/// Grants windows immediately unless `hold()` is set, in which case
/// acquirers park until `release` or `discard_pending`.
pub struct InMemoryUpdateCoordinator {
    hold: AtomicBool,
    refuse_discard: AtomicBool,
    pending: DashMap<DeploymentId, oneshot::Sender<WindowGrant>>,
    last_request: Mutex<Option<UpdateWindowRequest>>,
}

impl InMemoryUpdateCoordinator {
    pub fn new() -> Self {
        Self {
            hold: AtomicBool::new(false),
            refuse_discard: AtomicBool::new(false),
            pending: DashMap::new(),
            last_request: Mutex::new(None),
        }
    }

    /// Park acquirers until released or discarded.
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Simulate an action past the point of no return.
    pub fn refuse_discards(&self) {
        self.refuse_discard.store(true, Ordering::SeqCst);
    }

    /// Grant a held window.
    pub fn release(&self, deployment_id: &DeploymentId) {
        if let Some((_, tx)) = self.pending.remove(deployment_id) {
            let _ = tx.send(WindowGrant::Granted);
        }
    }

    /// The most recent window request, for assertions.
    pub fn last_request(&self) -> Option<UpdateWindowRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

impl Default for InMemoryUpdateCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateCoordinator for InMemoryUpdateCoordinator {
    async fn acquire_window(&self, request: UpdateWindowRequest) -> Result<WindowGrant> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        if !self.hold.load(Ordering::SeqCst) {
            return Ok(WindowGrant::Granted);
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.deployment_id.clone(), tx);
        match tokio::time::timeout(request.timeout, rx).await {
            Ok(Ok(grant)) => Ok(grant),
            // Sender dropped or acknowledgment window elapsed: proceed.
            Ok(Err(_)) | Err(_) => {
                self.pending.remove(&request.deployment_id);
                Ok(WindowGrant::Granted)
            }
        }
    }

    async fn discard_pending(&self, deployment_id: &DeploymentId) -> Result<bool> {
        if self.refuse_discard.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if let Some((_, tx)) = self.pending.remove(deployment_id) {
            let _ = tx.send(WindowGrant::Discarded);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// In-memory bootstrap layer.
pub struct InMemoryBootstrapManager {
    restart_required: AtomicBool,
    next_restart_required: AtomicBool,
    restart_panic: AtomicBool,
}

impl InMemoryBootstrapManager {
    pub fn new() -> Self {
        Self {
            restart_required: AtomicBool::new(false),
            next_restart_required: AtomicBool::new(false),
            restart_panic: AtomicBool::new(false),
        }
    }

    /// Make the pre-flight check demand a host-agent restart.
    pub fn set_restart_required(&self, required: bool) {
        self.restart_required.store(required, Ordering::SeqCst);
    }

    /// Make `run_pending` demand another restart.
    pub fn set_next_restart_required(&self, required: bool) {
        self.next_restart_required.store(required, Ordering::SeqCst);
    }

    /// Plant or clear the loader's restart-panic marker.
    pub fn set_restart_panic_marker(&self, present: bool) {
        self.restart_panic.store(present, Ordering::SeqCst);
    }
}

impl Default for InMemoryBootstrapManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BootstrapManager for InMemoryBootstrapManager {
    async fn restart_required(&self, _target: &ServiceConfigMap) -> Result<bool> {
        Ok(self.restart_required.load(Ordering::SeqCst))
    }

    async fn write_bootstrap_tasks(&self, tasks: &[BootstrapTask], path: &Path) -> Result<()> {
        let rendered = serde_json::to_string_pretty(tasks)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    async fn load_bootstrap_tasks(&self, path: &Path) -> Result<Vec<BootstrapTask>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn run_pending(&self, path: &Path) -> Result<bool> {
        let mut tasks = self.load_bootstrap_tasks(path).await?;
        for task in tasks.iter_mut() {
            task.completed = true;
        }
        self.write_bootstrap_tasks(&tasks, path).await?;
        Ok(self.next_restart_required.load(Ordering::SeqCst))
    }

    async fn restart_panic_marker_exists(&self) -> bool {
        self.restart_panic.load(Ordering::SeqCst)
    }
}

/// In-memory fleet inventory.
pub struct InMemoryFleetInventory {
    groups: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<FleetInventoryError>>,
    calls: AtomicU32,
}

impl InMemoryFleetInventory {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Set the groups the device belongs to.
    pub fn set_groups(&self, groups: Vec<String>) {
        *self.groups.lock().unwrap() = groups;
    }

    /// Script a failure for the next refresh.
    pub fn fail_next(&self, err: FleetInventoryError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// How many refreshes ran.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryFleetInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FleetInventory for InMemoryFleetInventory {
    async fn refresh_group_memberships(
        &self,
    ) -> std::result::Result<Vec<String>, FleetInventoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.groups.lock().unwrap().clone())
    }
}
