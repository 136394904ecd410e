use std::sync::Arc;

use irongate_auth::{AllowAll, Permission, PermissionChecker, Principal, Scope};
use irongate_core::CommandResult;

/// The acting principal plus the checker that judges it.
///
/// Every preparation step that emits events for a sensitive operation holds one
/// and calls [`Authz::require`] before reading or emitting anything else.
#[derive(Clone)]
pub struct Authz {
    checker: Arc<dyn PermissionChecker>,
    principal: Principal,
}

impl Authz {
    pub fn new(checker: Arc<dyn PermissionChecker>, principal: Principal) -> Self {
        Self { checker, principal }
    }

    /// Internal system actor, allowed everything.
    pub fn system() -> Self {
        Self::new(Arc::new(AllowAll), Principal::system())
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn require(&self, permission: &Permission, scope: &Scope) -> CommandResult<()> {
        self.checker
            .check(&self.principal, permission, scope)
            .map_err(Into::into)
    }
}

impl core::fmt::Debug for Authz {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Authz")
            .field("principal", &self.principal.principal_id)
            .finish_non_exhaustive()
    }
}
