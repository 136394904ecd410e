use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use irongate_core::CommandError;

use crate::{Membership, Permission, PrincipalId, RolePolicy, Scope};

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from storage and transport: callers derive the
/// memberships from whatever identity source they trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub memberships: Vec<Membership>,
    /// Internal system actor (setup, migrations). Allowed everything.
    pub system: bool,
}

impl Principal {
    pub fn new(principal_id: PrincipalId) -> Self {
        Self {
            principal_id,
            memberships: Vec::new(),
            system: false,
        }
    }

    pub fn system() -> Self {
        Self {
            principal_id: PrincipalId::new("SYSTEM"),
            memberships: Vec::new(),
            system: true,
        }
    }

    pub fn with_membership(mut self, membership: Membership) -> Self {
        self.memberships.push(membership);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{permission}' on {scope}")]
    Forbidden { permission: String, scope: String },
}

impl From<AuthzError> for CommandError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Forbidden { permission, .. } => {
                CommandError::permission_denied(format!("Errors.PermissionDenied: {permission}"))
            }
        }
    }
}

/// Decides whether a principal may act on a scope.
///
/// Invoked by preparation steps before they emit events for sensitive operations.
pub trait PermissionChecker: Send + Sync {
    fn check(&self, principal: &Principal, permission: &Permission, target: &Scope) -> Result<(), AuthzError>;
}

impl<T: PermissionChecker + ?Sized> PermissionChecker for Arc<T> {
    fn check(&self, principal: &Principal, permission: &Permission, target: &Scope) -> Result<(), AuthzError> {
        (**self).check(principal, permission, target)
    }
}

/// Role based checker: a membership on a covering scope must hold a role that
/// grants the permission.
#[derive(Debug, Clone)]
pub struct PolicyChecker {
    policy: RolePolicy,
}

impl PolicyChecker {
    pub fn new(policy: RolePolicy) -> Self {
        Self { policy }
    }
}

impl Default for PolicyChecker {
    fn default() -> Self {
        Self::new(RolePolicy::iam_default())
    }
}

impl PermissionChecker for PolicyChecker {
    fn check(&self, principal: &Principal, permission: &Permission, target: &Scope) -> Result<(), AuthzError> {
        authorize(&self.policy, principal, permission, target)
    }
}

/// Allows everything. For tests and trusted internal callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn check(&self, _: &Principal, _: &Permission, _: &Scope) -> Result<(), AuthzError> {
        Ok(())
    }
}

/// Authorize `principal` for `required` on `target`.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(
    policy: &RolePolicy,
    principal: &Principal,
    required: &Permission,
    target: &Scope,
) -> Result<(), AuthzError> {
    if principal.system {
        return Ok(());
    }

    let granted = principal
        .memberships
        .iter()
        .filter(|m| m.scope.covers(target))
        .any(|m| policy.allows(&m.roles, required));

    if granted {
        Ok(())
    } else {
        debug!(principal = %principal.principal_id, permission = %required, scope = %target, "permission denied");
        Err(AuthzError::Forbidden {
            permission: required.as_str().to_string(),
            scope: target.to_string(),
        })
    }
}
