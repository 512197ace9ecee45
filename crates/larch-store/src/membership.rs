//! Group membership store.
//!
//! Keeps the authoritative group → root-components table and the derived
//! components → groups table, plus per-group last-deployment summaries and
//! the shadow-stream high-water mark. Both tables are always swapped
//! wholesale, never edited incrementally.

use crate::error::Result;
use crate::fs_util::{atomic_write_json, read_json_opt};
use larch_supervisor::ServiceGraph;
use larch_types::{
    ComponentsToGroups, ConfigurationArn, DeploymentId, DeploymentSummary, GroupRoot,
    GroupToRoots, RootComponent,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

const GROUP_TO_ROOTS_FILE: &str = "group_to_root_components.json";
const COMPONENTS_TO_GROUPS_FILE: &str = "components_to_groups.json";
const LAST_DEPLOYMENTS_FILE: &str = "group_to_last_deployment.json";
const LAST_SHADOW_FILE: &str = "last_successful_shadow_deployment.json";

#[derive(Default)]
struct Tables {
    group_to_roots: GroupToRoots,
    components_to_groups: ComponentsToGroups,
    last_deployments: BTreeMap<String, DeploymentSummary>,
    last_shadow_deployment: Option<DeploymentId>,
}

/// Persisted membership tables.
pub struct MembershipStore {
    dir: PathBuf,
    tables: RwLock<Tables>,
}

impl MembershipStore {
    /// Open (creating if needed) the store directory and load the tables.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| crate::error::StoreError::io(&dir, e))?;

        let tables = Tables {
            group_to_roots: read_json_opt(&dir.join(GROUP_TO_ROOTS_FILE))?.unwrap_or_default(),
            components_to_groups: read_json_opt(&dir.join(COMPONENTS_TO_GROUPS_FILE))?
                .unwrap_or_default(),
            last_deployments: read_json_opt(&dir.join(LAST_DEPLOYMENTS_FILE))?.unwrap_or_default(),
            last_shadow_deployment: read_json_opt(&dir.join(LAST_SHADOW_FILE))?.flatten(),
        };

        Ok(Self {
            dir,
            tables: RwLock::new(tables),
        })
    }

    /// Snapshot of the authoritative table.
    pub fn group_to_roots(&self) -> GroupToRoots {
        self.tables.read().unwrap().group_to_roots.clone()
    }

    /// Snapshot of the derived table.
    pub fn components_to_groups(&self) -> ComponentsToGroups {
        self.tables.read().unwrap().components_to_groups.clone()
    }

    /// Root components currently recorded for `group`, in table order.
    pub fn roots_for_group(&self, group: &str) -> Vec<RootComponent> {
        self.tables
            .read()
            .unwrap()
            .group_to_roots
            .get(group)
            .map(|roots| {
                roots
                    .iter()
                    .map(|(name, entry)| RootComponent::new(name, entry.version.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Atomically replace one group's subtree of the authoritative table.
    ///
    /// An empty root list tombstones the group out of the table.
    pub fn update_group_roots(
        &self,
        group: &str,
        configuration_arn: Option<&ConfigurationArn>,
        roots: &[RootComponent],
    ) -> Result<()> {
        let arn = configuration_arn
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| group.to_string());

        let mut tables = self.tables.write().unwrap();
        if roots.is_empty() {
            tables.group_to_roots.remove(group);
            debug!(group, "Removed empty group from roots table");
        } else {
            let entry: BTreeMap<String, GroupRoot> = roots
                .iter()
                .map(|root| {
                    (
                        root.name.clone(),
                        GroupRoot {
                            version: root.version.clone(),
                            group_config_arn: arn.clone(),
                            group_config_name: group.to_string(),
                        },
                    )
                })
                .collect();
            tables.group_to_roots.insert(group.to_string(), entry);
        }
        atomic_write_json(&self.dir.join(GROUP_TO_ROOTS_FILE), &tables.group_to_roots)
    }

    /// Recompute the derived components → groups table.
    ///
    /// For every root of every group, the root's transitive hard-dependency
    /// closure (queried from the supervisor) is mapped back to the group.
    /// The whole table is swapped in one write.
    pub async fn recompute_component_groups(&self, graph: &dyn ServiceGraph) -> Result<()> {
        let roots = self.group_to_roots();

        let mut derived = ComponentsToGroups::new();
        for (group, components) in &roots {
            for (root_name, entry) in components {
                let closure = match hard_closure(graph, root_name).await {
                    Some(closure) => closure,
                    None => {
                        warn!(group, root = root_name, "Root component not in service graph");
                        continue;
                    }
                };
                for service in closure {
                    derived
                        .entry(service)
                        .or_default()
                        .insert(entry.group_config_arn.clone(), group.clone());
                }
            }
        }

        let mut tables = self.tables.write().unwrap();
        tables.components_to_groups = derived;
        atomic_write_json(
            &self.dir.join(COMPONENTS_TO_GROUPS_FILE),
            &tables.components_to_groups,
        )
    }

    /// Record the last deployment a group received.
    pub fn record_last_deployment(&self, group: &str, summary: DeploymentSummary) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.last_deployments.insert(group.to_string(), summary);
        atomic_write_json(&self.dir.join(LAST_DEPLOYMENTS_FILE), &tables.last_deployments)
    }

    /// Last deployment summary for a group.
    pub fn last_deployment(&self, group: &str) -> Option<DeploymentSummary> {
        self.tables.read().unwrap().last_deployments.get(group).cloned()
    }

    /// Record the shadow-stream high-water mark.
    pub fn set_last_shadow_deployment(&self, id: DeploymentId) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.last_shadow_deployment = Some(id);
        atomic_write_json(
            &self.dir.join(LAST_SHADOW_FILE),
            &tables.last_shadow_deployment,
        )
    }

    /// The shadow-stream high-water mark, if any.
    pub fn last_shadow_deployment(&self) -> Option<DeploymentId> {
        self.tables.read().unwrap().last_shadow_deployment.clone()
    }
}

/// Breadth-first walk over hard-dependency edges, root included.
///
/// `None` when the root itself is not in the service graph; unknown
/// dependencies are skipped.
async fn hard_closure(graph: &dyn ServiceGraph, root: &str) -> Option<Vec<String>> {
    if graph.status(root).await.is_err() {
        return None;
    }

    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from([root.to_string()]);
    let mut closure = Vec::new();
    while let Some(name) = queue.pop_front() {
        if !visited.insert(name.clone()) {
            continue;
        }
        let deps = graph.hard_dependencies(&name).await.unwrap_or_default();
        closure.push(name);
        for dep in deps {
            if !visited.contains(&dep) {
                queue.push_back(dep);
            }
        }
    }
    Some(closure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_supervisor::InMemoryServiceGraph;
    use tempfile::TempDir;

    fn root(name: &str, major: u64) -> RootComponent {
        RootComponent::new(name, semver::Version::new(major, 0, 0))
    }

    #[test]
    fn update_group_roots_replaces_and_tombstones() {
        let tmp = TempDir::new().unwrap();
        let store = MembershipStore::new(tmp.path()).unwrap();

        store
            .update_group_roots(
                "thinggroup/group1",
                Some(&ConfigurationArn::new("arn1")),
                &[root("component1", 1)],
            )
            .unwrap();
        assert_eq!(store.roots_for_group("thinggroup/group1").len(), 1);

        store
            .update_group_roots("thinggroup/group1", Some(&ConfigurationArn::new("arn1")), &[])
            .unwrap();
        assert!(store.group_to_roots().is_empty());
    }

    #[test]
    fn tables_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = MembershipStore::new(tmp.path()).unwrap();
            store
                .update_group_roots(
                    "thinggroup/group1",
                    Some(&ConfigurationArn::new("arn1")),
                    &[root("component1", 1)],
                )
                .unwrap();
            store
                .set_last_shadow_deployment(DeploymentId::new("S9"))
                .unwrap();
        }
        let store = MembershipStore::new(tmp.path()).unwrap();
        assert_eq!(store.roots_for_group("thinggroup/group1").len(), 1);
        assert_eq!(store.last_shadow_deployment(), Some(DeploymentId::new("S9")));
    }

    #[tokio::test]
    async fn derived_table_follows_hard_closure() {
        let tmp = TempDir::new().unwrap();
        let store = MembershipStore::new(tmp.path()).unwrap();
        let graph = InMemoryServiceGraph::new();
        graph.install("component1", serde_json::json!({}));
        graph.install("AnotherRoot", serde_json::json!({}));
        graph.install("Dependency", serde_json::json!({}));
        graph.set_hard_dependencies("component1", vec!["Dependency".into()]);
        graph.set_hard_dependencies("AnotherRoot", vec!["Dependency".into()]);

        store
            .update_group_roots(
                larch_types::LOCAL_DEPLOYMENT_GROUP,
                Some(&ConfigurationArn::new("local-arn")),
                &[root("component1", 1), root("AnotherRoot", 2)],
            )
            .unwrap();
        store
            .update_group_roots(
                "thinggroup/group1",
                Some(&ConfigurationArn::new("arn1")),
                &[root("component1", 1)],
            )
            .unwrap();

        store.recompute_component_groups(&graph).await.unwrap();
        let derived = store.components_to_groups();

        let component1 = derived.get("component1").unwrap();
        assert_eq!(component1.get("arn1").unwrap(), "thinggroup/group1");
        assert_eq!(
            component1.get("local-arn").unwrap(),
            larch_types::LOCAL_DEPLOYMENT_GROUP
        );

        let another = derived.get("AnotherRoot").unwrap();
        assert_eq!(another.len(), 1);
        assert_eq!(
            another.get("local-arn").unwrap(),
            larch_types::LOCAL_DEPLOYMENT_GROUP
        );

        let dependency = derived.get("Dependency").unwrap();
        assert_eq!(dependency.get("arn1").unwrap(), "thinggroup/group1");
        assert_eq!(
            dependency.get("local-arn").unwrap(),
            larch_types::LOCAL_DEPLOYMENT_GROUP
        );
    }

    #[tokio::test]
    async fn missing_root_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let store = MembershipStore::new(tmp.path()).unwrap();
        let graph = InMemoryServiceGraph::new();

        store
            .update_group_roots(
                "thinggroup/group1",
                Some(&ConfigurationArn::new("arn1")),
                &[root("ghost", 1)],
            )
            .unwrap();
        store.recompute_component_groups(&graph).await.unwrap();
        assert!(store.components_to_groups().is_empty());
    }
}
