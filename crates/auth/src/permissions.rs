use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "org.member.write"). The wildcard `"*"`
/// grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    /// Manage the instance itself (its domains).
    pub const IAM_WRITE: Permission = Permission(Cow::Borrowed("iam.write"));
    pub const ORG_CREATE: Permission = Permission(Cow::Borrowed("org.create"));
    pub const ORG_WRITE: Permission = Permission(Cow::Borrowed("org.write"));
    pub const ORG_DELETE: Permission = Permission(Cow::Borrowed("org.delete"));
    pub const ORG_MEMBER_WRITE: Permission = Permission(Cow::Borrowed("org.member.write"));
    pub const USER_WRITE: Permission = Permission(Cow::Borrowed("user.write"));
    pub const USER_DELETE: Permission = Permission(Cow::Borrowed("user.delete"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Whether holding `self` grants `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        self.is_wildcard() || self == required
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
