//! IAM domain module (event-sourced).
//!
//! Business rules for instances, organizations, org domains, users and org
//! members, written as write models plus preparation steps. No IO happens here:
//! every read goes through the [`irongate_events::ReadSet`] a step is given, and
//! every change leaves as a [`irongate_events::PendingEvent`].

pub mod authz;
pub mod event;
pub mod instance;
pub mod member;
pub mod org;
pub mod org_domain;
pub mod unique;
pub mod user;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use authz::Authz;
pub use event::{IamCodec, IamEvent};
pub use instance::{
    AddInstance, AddInstanceDomain, InstanceDomainWriteModel, InstanceWriteModel, RemoveInstance,
    RemoveInstanceDomain, SetDefaultOrg, SetPrimaryInstanceDomain,
};
pub use member::{AddOrgMember, ChangeOrgMember, OrgMemberWriteModel, RemoveOrgMember, ORG_ROLES};
pub use org::{AddOrg, ChangeOrg, DeactivateOrg, OrgWriteModel, ReactivateOrg, RemoveOrg};
pub use org_domain::{
    AddOrgDomain, OrgDomainWriteModel, RemoveOrgDomain, SetPrimaryOrgDomain, VerifyOrgDomain,
};
pub use user::{
    AddHumanUser, ChangeUsername, DeactivateUser, DomainPolicy, ReactivateUser, RemoveUser,
    UserWriteModel,
};
pub use validation::{default_org_domain, normalize_domain};
