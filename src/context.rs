//! Per-request version context handed to both validation paths.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The operation being validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Update => f.write_str("update"),
        }
    }
}

/// API group, version, resource and operation of a validation request.
///
/// Never mutated once built; the `with_*` methods return a new context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionContext {
    /// API group, empty for the core group.
    pub api_group: String,
    /// API version, e.g. `v1beta1`.
    pub api_version: String,
    /// Plural resource name, e.g. `volumeattachments`.
    pub resource: String,
    /// Create or update.
    pub operation: Operation,
}

impl VersionContext {
    /// A create-request context for `resource` in `group/version`.
    pub fn new(
        api_group: impl Into<String>,
        api_version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            api_group: api_group.into(),
            api_version: api_version.into(),
            resource: resource.into(),
            operation: Operation::Create,
        }
    }

    /// This context with `operation` in place of the current one.
    pub fn with_operation(&self, operation: Operation) -> Self {
        Self {
            operation,
            ..self.clone()
        }
    }

    /// This context for another API version of the same resource.
    pub fn with_version(&self, api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            ..self.clone()
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn group_version(&self) -> String {
        if self.api_group.is_empty() {
            self.api_version.clone()
        } else {
            format!("{}/{}", self.api_group, self.api_version)
        }
    }
}

impl fmt::Display for VersionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, Resource={}",
            self.operation,
            self.group_version(),
            self.resource
        )
    }
}
