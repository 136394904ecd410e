//! `irongate-auth`: the permission checker collaborator.
//!
//! Decoupled from transport and storage: a [`Principal`] arrives resolved, and a
//! [`PermissionChecker`] answers allow/deny for one permission on one [`Scope`].

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, AllowAll, AuthzError, PermissionChecker, PolicyChecker, Principal};
pub use permissions::Permission;
pub use principal::{Membership, PrincipalId, Scope};
pub use roles::{Role, RolePolicy};
