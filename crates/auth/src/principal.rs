use serde::{Deserialize, Serialize};

use crate::Role;

/// Identity of the acting principal (human user, service account, system).
///
/// Recorded as the `creator` of every event it pushes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a permission is required or a membership applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    Instance { instance_id: String },
    Org { instance_id: String, org_id: String },
}

impl Scope {
    pub fn instance(instance_id: impl Into<String>) -> Self {
        Self::Instance {
            instance_id: instance_id.into(),
        }
    }

    pub fn org(instance_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self::Org {
            instance_id: instance_id.into(),
            org_id: org_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        match self {
            Scope::Instance { instance_id } | Scope::Org { instance_id, .. } => instance_id,
        }
    }

    /// Whether a membership on `self` reaches `target`.
    ///
    /// An instance membership covers every org of that instance.
    pub fn covers(&self, target: &Scope) -> bool {
        match (self, target) {
            (Scope::Instance { instance_id }, _) => instance_id == target.instance_id(),
            (
                Scope::Org { instance_id, org_id },
                Scope::Org {
                    instance_id: target_instance,
                    org_id: target_org,
                },
            ) => instance_id == target_instance && org_id == target_org,
            (Scope::Org { .. }, Scope::Instance { .. }) => false,
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::Instance { instance_id } => write!(f, "instance:{instance_id}"),
            Scope::Org { instance_id, org_id } => write!(f, "org:{instance_id}/{org_id}"),
        }
    }
}

/// Roles a principal holds on one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub scope: Scope,
    pub roles: Vec<Role>,
}
