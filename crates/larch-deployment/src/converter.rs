//! Intent normalization.
//!
//! Converts the three inbound document shapes into one
//! `DeploymentDocument`. Validation failures surface as `INVALID_REQUEST`
//! and reject the deployment before any pipeline work.

use chrono::Utc;
use larch_types::{
    CloudConfiguration, ComponentUpdatePolicy, ConfigurationArn, ConfigurationUpdate, Deployment,
    DeploymentDocument, DeploymentError, DeploymentIntent, FailureHandlingPolicy,
    FleetConfiguration, LocalOverrideRequest, RootComponent, LOCAL_DEPLOYMENT_GROUP,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Normalize a deployment's raw intent into a document.
///
/// `local_roots` are the roots currently recorded for the local group;
/// `known_components` are the services the supervisor already runs. Both
/// feed the local-override computation and the configuration-update target
/// check.
pub fn convert(
    deployment: &Deployment,
    local_roots: &[RootComponent],
    known_components: &BTreeSet<String>,
) -> Result<DeploymentDocument, DeploymentError> {
    let intent = deployment
        .intent
        .as_ref()
        .ok_or_else(|| DeploymentError::invalid_request("deployment carries no intent"))?;

    let document = match intent {
        DeploymentIntent::CloudConfiguration(config) => convert_cloud(config)?,
        DeploymentIntent::FleetConfiguration(config) => convert_fleet(config)?,
        DeploymentIntent::LocalOverride(request) => convert_local(request, local_roots)?,
    };

    document
        .validate()
        .map_err(|e| DeploymentError::invalid_request(e.to_string()))?;
    check_update_targets(&document, known_components)?;

    debug!(
        id = %deployment.id,
        group = %document.group_name,
        roots = document.root_components.len(),
        "Normalized deployment document"
    );
    Ok(document)
}

fn convert_cloud(config: &CloudConfiguration) -> Result<DeploymentDocument, DeploymentError> {
    let mut root_components = Vec::new();
    let mut configuration_updates = BTreeMap::new();
    let mut runtime_overrides = BTreeMap::new();

    for (name, target) in &config.components {
        root_components.push(RootComponent::new(name, parse_version(name, &target.version)?));
        if let Some(update) = &target.configuration_update {
            configuration_updates.insert(name.clone(), update.clone());
        }
        if let Some(run_with) = &target.run_with {
            runtime_overrides.insert(name.clone(), run_with.clone());
        }
    }

    Ok(DeploymentDocument {
        group_name: config.group_name.clone(),
        configuration_arn: Some(ConfigurationArn::new(&config.configuration_arn)),
        timestamp: config.creation_timestamp,
        root_components,
        configuration_updates,
        runtime_overrides,
        component_update_policy: config.component_update_policy.clone().unwrap_or_default(),
        failure_handling_policy: config.failure_handling_policy.unwrap_or_default(),
        required_capabilities: config.required_capabilities.clone(),
    })
}

fn convert_fleet(config: &FleetConfiguration) -> Result<DeploymentDocument, DeploymentError> {
    let mut root_components = Vec::new();
    let mut configuration_updates = BTreeMap::new();

    for (name, target) in &config.components {
        root_components.push(RootComponent::new(name, parse_version(name, &target.version)?));
        if let Some(configuration) = &target.configuration {
            configuration_updates.insert(name.clone(), whole_object_replace(configuration));
        }
    }

    Ok(DeploymentDocument {
        group_name: config.group_name.clone(),
        configuration_arn: None,
        timestamp: config.creation_timestamp,
        root_components,
        configuration_updates,
        runtime_overrides: BTreeMap::new(),
        component_update_policy: ComponentUpdatePolicy::default(),
        // Legacy documents that omit the policy get DO_NOTHING.
        failure_handling_policy: config
            .failure_handling_policy
            .unwrap_or(FailureHandlingPolicy::DoNothing),
        required_capabilities: BTreeSet::new(),
    })
}

fn convert_local(
    request: &LocalOverrideRequest,
    local_roots: &[RootComponent],
) -> Result<DeploymentDocument, DeploymentError> {
    // Effective roots = (current − components_to_remove) ∪ components_to_merge.
    let removed: BTreeSet<&str> = request
        .components_to_remove
        .iter()
        .map(String::as_str)
        .collect();

    let mut root_components: Vec<RootComponent> = local_roots
        .iter()
        .filter(|root| !removed.contains(root.name.as_str()))
        .cloned()
        .collect();

    for (name, version) in &request.components_to_merge {
        let version = parse_version(name, version)?;
        match root_components.iter_mut().find(|r| &r.name == name) {
            Some(existing) => existing.version = version,
            None => root_components.push(RootComponent::new(name, version)),
        }
    }

    let mut configuration_updates = BTreeMap::new();
    for (name, configuration) in &request.component_name_to_config {
        configuration_updates.insert(name.clone(), whole_object_replace(configuration));
    }
    // Merge/reset updates win over whole-object replacements.
    for (name, update) in &request.configuration_updates {
        configuration_updates.insert(name.clone(), update.clone());
    }

    Ok(DeploymentDocument {
        group_name: LOCAL_DEPLOYMENT_GROUP.to_string(),
        configuration_arn: None,
        timestamp: Utc::now(),
        root_components,
        configuration_updates,
        runtime_overrides: request.runtime_overrides.clone(),
        component_update_policy: request.component_update_policy.clone().unwrap_or_default(),
        failure_handling_policy: request.failure_handling_policy.unwrap_or_default(),
        required_capabilities: request.required_capabilities.clone(),
    })
}

/// A whole-object replacement resets the component's config root before the
/// merge, so keys absent from the new object do not survive.
fn whole_object_replace(configuration: &serde_json::Value) -> ConfigurationUpdate {
    ConfigurationUpdate {
        merge: Some(configuration.clone()),
        reset: vec![String::new()],
    }
}

fn parse_version(component: &str, version: &str) -> Result<semver::Version, DeploymentError> {
    semver::Version::parse(version).map_err(|e| {
        DeploymentError::invalid_request(format!("invalid version for {component}: {e}"))
    })
}

/// Every configuration update must target a root or a component the device
/// already runs.
fn check_update_targets(
    document: &DeploymentDocument,
    known_components: &BTreeSet<String>,
) -> Result<(), DeploymentError> {
    let roots: BTreeSet<&str> = document
        .root_components
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    for name in document.configuration_updates.keys() {
        if !roots.contains(name.as_str()) && !known_components.contains(name) {
            return Err(DeploymentError::invalid_request(format!(
                "configuration update targets unknown component: {name}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_types::{DeploymentId, DeploymentType, ErrorCode, FleetComponentTarget};

    fn local_deployment(request: LocalOverrideRequest) -> Deployment {
        Deployment::new(
            DeploymentId::new("L1"),
            DeploymentType::Local,
            DeploymentIntent::LocalOverride(request),
        )
    }

    #[test]
    fn local_override_merges_and_removes_roots() {
        let current = vec![
            RootComponent::new("component1", semver::Version::new(1, 0, 0)),
            RootComponent::new("OldRoot", semver::Version::new(1, 0, 0)),
        ];
        let request = LocalOverrideRequest {
            components_to_merge: BTreeMap::from([
                ("component1".to_string(), "2.0.0".to_string()),
                ("NewRoot".to_string(), "1.0.0".to_string()),
            ]),
            components_to_remove: vec!["OldRoot".into()],
            ..Default::default()
        };

        let document = convert(&local_deployment(request), &current, &BTreeSet::new()).unwrap();

        assert_eq!(document.group_name, LOCAL_DEPLOYMENT_GROUP);
        let names = document.root_names();
        assert_eq!(names, vec!["component1", "NewRoot"]);
        assert_eq!(
            document.root_components[0].version,
            semver::Version::new(2, 0, 0)
        );
        assert_eq!(
            document.failure_handling_policy,
            FailureHandlingPolicy::Rollback
        );
    }

    #[test]
    fn malformed_version_is_an_invalid_request() {
        let request = LocalOverrideRequest {
            components_to_merge: BTreeMap::from([("component1".to_string(), "not-semver".to_string())]),
            ..Default::default()
        };
        let err = convert(&local_deployment(request), &[], &BTreeSet::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn update_for_unknown_component_is_rejected() {
        let request = LocalOverrideRequest {
            components_to_merge: BTreeMap::from([("component1".to_string(), "1.0.0".to_string())]),
            configuration_updates: BTreeMap::from([(
                "ghost".to_string(),
                ConfigurationUpdate::default(),
            )]),
            ..Default::default()
        };
        let err = convert(&local_deployment(request), &[], &BTreeSet::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn update_for_existing_dependency_is_accepted() {
        let request = LocalOverrideRequest {
            components_to_merge: BTreeMap::from([("component1".to_string(), "1.0.0".to_string())]),
            configuration_updates: BTreeMap::from([(
                "Dependency".to_string(),
                ConfigurationUpdate::default(),
            )]),
            ..Default::default()
        };
        let known = BTreeSet::from(["Dependency".to_string()]);
        assert!(convert(&local_deployment(request), &[], &known).is_ok());
    }

    #[test]
    fn legacy_fleet_document_defaults_to_do_nothing() {
        let config = FleetConfiguration {
            group_name: "thinggroup/group1".into(),
            components: BTreeMap::from([(
                "component1".to_string(),
                FleetComponentTarget {
                    version: "1.0.0".into(),
                    configuration: Some(serde_json::json!({"k": "v"})),
                },
            )]),
            creation_timestamp: Utc::now(),
            failure_handling_policy: None,
        };
        let deployment = Deployment::new(
            DeploymentId::new("F1"),
            DeploymentType::CloudJob,
            DeploymentIntent::FleetConfiguration(config),
        );

        let document = convert(&deployment, &[], &BTreeSet::new()).unwrap();
        assert_eq!(
            document.failure_handling_policy,
            FailureHandlingPolicy::DoNothing
        );
        // The whole-object config clears the component's config root
        // before merging.
        let update = document.configuration_updates.get("component1").unwrap();
        assert_eq!(update.merge, Some(serde_json::json!({"k": "v"})));
        assert_eq!(update.reset, vec![String::new()]);
    }

    #[test]
    fn local_whole_object_config_resets_before_merge() {
        let request = LocalOverrideRequest {
            components_to_merge: BTreeMap::from([("component1".to_string(), "1.0.0".to_string())]),
            component_name_to_config: BTreeMap::from([(
                "component1".to_string(),
                serde_json::json!({"fresh": true}),
            )]),
            ..Default::default()
        };

        let document = convert(&local_deployment(request), &[], &BTreeSet::new()).unwrap();
        let update = document.configuration_updates.get("component1").unwrap();
        assert_eq!(update.merge, Some(serde_json::json!({"fresh": true})));
        assert_eq!(update.reset, vec![String::new()]);
    }
}
