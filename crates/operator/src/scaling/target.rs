use std::fmt;

use crate::{Error, Result};

/// Fully qualified reference to a scalable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetRef {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub group: String,
    pub version: String,
}

impl TargetRef {
    /// Builds a reference from an `apiVersion` such as `apps/v1`. Every part,
    /// the API group included, must be present.
    pub fn new(name: &str, namespace: &str, kind: &str, api_version: &str) -> Result<Self> {
        let target = Self::from_api_version(name, namespace, kind, api_version);
        let missing = [
            &target.name,
            &target.namespace,
            &target.kind,
            &target.group,
            &target.version,
        ]
        .iter()
        .any(|part| part.trim().is_empty());

        if missing {
            return Err(Error::Validation(format!(
                "any properties in ref could not be empty, got name:{} namespace:{} kind:{} apiVersion:{}",
                name, namespace, kind, api_version
            )));
        }
        Ok(target)
    }

    /// Like [`TargetRef::new`] but accepts the core API group, as used by
    /// the scale targets of autoscalers.
    pub fn from_api_version(name: &str, namespace: &str, kind: &str, api_version: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind: kind.to_string(),
            group: group.to_string(),
            version: version.to_string(),
        }
    }

    pub fn is_autoscaler(&self) -> bool {
        self.kind == "HorizontalPodAutoscaler"
    }

    /// Concatenated key used when comparing jobs.
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.name, self.namespace, self.kind, self.group, self.version
        )
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
