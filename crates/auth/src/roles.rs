use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC (e.g. `ORG_OWNER`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const IAM_OWNER: Role = Role(Cow::Borrowed("IAM_OWNER"));
    pub const ORG_OWNER: Role = Role(Cow::Borrowed("ORG_OWNER"));
    pub const ORG_USER_MANAGER: Role = Role(Cow::Borrowed("ORG_USER_MANAGER"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role → permission mapping.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    grants: HashMap<Role, Vec<Permission>>,
}

impl RolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, role: Role, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.grants.entry(role).or_default().extend(permissions);
        self
    }

    pub fn permissions(&self, role: &Role) -> &[Permission] {
        self.grants.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any of `roles` grants `required`.
    pub fn allows<'a>(&self, roles: impl IntoIterator<Item = &'a Role>, required: &Permission) -> bool {
        roles
            .into_iter()
            .any(|role| self.permissions(role).iter().any(|p| p.grants(required)))
    }

    /// The built-in IAM roles.
    pub fn iam_default() -> Self {
        Self::new()
            .grant(Role::IAM_OWNER, [Permission::WILDCARD])
            .grant(
                Role::ORG_OWNER,
                [
                    Permission::ORG_WRITE,
                    Permission::ORG_DELETE,
                    Permission::ORG_MEMBER_WRITE,
                    Permission::USER_WRITE,
                    Permission::USER_DELETE,
                ],
            )
            .grant(Role::ORG_USER_MANAGER, [Permission::USER_WRITE])
    }
}
