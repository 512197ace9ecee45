//! Service diff between the running graph and a target configuration.

use larch_supervisor::ServiceConfigMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which services a merge adds, updates, and removes.
///
/// `to_add ∪ to_update ∪ to_remove` partitions the union of current and
/// target service names, minus built-ins on the remove side — built-in
/// services are never removed by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDiff {
    /// Names in the target but not in the current graph.
    pub to_add: BTreeSet<String>,

    /// Names in both; configuration may differ.
    pub to_update: BTreeSet<String>,

    /// Names in the current graph but not in the target, excluding
    /// built-ins.
    pub to_remove: BTreeSet<String>,
}

impl ServiceDiff {
    /// Compute the diff for a merge.
    pub fn between(
        current: &ServiceConfigMap,
        target: &ServiceConfigMap,
        builtin: &BTreeSet<String>,
    ) -> Self {
        let current_names: BTreeSet<&String> = current.keys().collect();
        let target_names: BTreeSet<&String> = target.keys().collect();

        Self {
            to_add: target_names
                .difference(&current_names)
                .map(|s| (*s).clone())
                .collect(),
            to_update: target_names
                .intersection(&current_names)
                .map(|s| (*s).clone())
                .collect(),
            to_remove: current_names
                .difference(&target_names)
                .filter(|name| !builtin.contains(**name))
                .map(|s| (*s).clone())
                .collect(),
        }
    }

    /// The inverse diff, used when activation fails and the snapshot is
    /// restored: adds become removes and vice versa.
    pub fn rollback(&self) -> Self {
        Self {
            to_add: self.to_remove.clone(),
            to_update: self.to_update.clone(),
            to_remove: self.to_add.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(names: &[&str]) -> ServiceConfigMap {
        names
            .iter()
            .map(|n| (n.to_string(), serde_json::json!({})))
            .collect()
    }

    #[test]
    fn diff_partitions_current_and_target() {
        let current = config(&["keep", "drop", "system"]);
        let target = config(&["keep", "fresh"]);
        let builtin = BTreeSet::from(["system".to_string()]);

        let diff = ServiceDiff::between(&current, &target, &builtin);
        assert_eq!(diff.to_add, BTreeSet::from(["fresh".to_string()]));
        assert_eq!(diff.to_update, BTreeSet::from(["keep".to_string()]));
        assert_eq!(diff.to_remove, BTreeSet::from(["drop".to_string()]));

        // Disjointness.
        assert!(diff.to_add.is_disjoint(&diff.to_update));
        assert!(diff.to_add.is_disjoint(&diff.to_remove));
        assert!(diff.to_update.is_disjoint(&diff.to_remove));

        // Coverage: everything except the protected built-in.
        let mut covered: BTreeSet<String> = diff.to_add.clone();
        covered.extend(diff.to_update.clone());
        covered.extend(diff.to_remove.clone());
        let mut expected: BTreeSet<String> =
            current.keys().chain(target.keys()).cloned().collect();
        expected.remove("system");
        assert_eq!(covered, expected);
    }

    #[test]
    fn rollback_swaps_add_and_remove() {
        let current = config(&["a", "b"]);
        let target = config(&["b", "c"]);
        let diff = ServiceDiff::between(&current, &target, &BTreeSet::new());
        let inverse = diff.rollback();

        assert_eq!(inverse.to_add, diff.to_remove);
        assert_eq!(inverse.to_remove, diff.to_add);
        assert_eq!(inverse.to_update, diff.to_update);
        // Double inversion is the identity.
        assert_eq!(inverse.rollback(), diff);
    }
}
