//! Identifier newtypes shared across the deployment core.

use serde::{Deserialize, Serialize};

/// Opaque, stable deployment identifier.
///
/// Assigned by whichever ingester created the deployment; the queue uses it
/// (together with type and stage) as the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a deployment ID from an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Versioned cloud identifier of a deployment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigurationArn(String);

impl ConfigurationArn {
    /// Wrap an existing ARN string.
    pub fn new(arn: impl Into<String>) -> Self {
        Self(arn.into())
    }

    /// Get the ARN as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe directory name for this ARN.
    ///
    /// Forward slashes are replaced with `+`; colons are preserved.
    pub fn directory_name(&self) -> String {
        self.0.replace('/', "+")
    }
}

impl std::fmt::Display for ConfigurationArn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_name_sanitizes_slashes_only() {
        let arn = ConfigurationArn::new("arn:aws:gg:us-east-1:1234:configuration:thinggroup/group1:7");
        assert_eq!(
            arn.directory_name(),
            "arn:aws:gg:us-east-1:1234:configuration:thinggroup+group1:7"
        );
    }
}
