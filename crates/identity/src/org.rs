//! Organization aggregate: write model and lifecycle steps.
//!
//! An org owns itself (`owner == id`). Creating one also creates, verifies and
//! makes primary its default domain, derived from the org name and the domain
//! the instance was reached under.

use std::collections::BTreeMap;

use async_trait::async_trait;

use irongate_auth::{Permission, Scope};
use irongate_core::{AggregateRef, CommandError, CommandResult};
use irongate_events::{
    load, AggregateState, Event, PendingEvent, Preparation, ReadSet, SearchQuery, WriteModel,
    WriteModelBase,
};

use crate::authz::Authz;
use crate::event::{types, *};
use crate::instance::InstanceWriteModel;
use crate::user;
use crate::validation::{default_org_domain, require};

pub const AGGREGATE_TYPE: &str = "org";

pub fn aggregate(instance_id: &str, org_id: &str) -> AggregateRef {
    AggregateRef::new(AGGREGATE_TYPE, org_id, instance_id, org_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Write model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrgDomainEntry {
    pub verified: bool,
    pub primary: bool,
}

/// The whole stream of one org: lifecycle, name, domains and members.
///
/// Reads every event of the aggregate, so pushes derived from it use
/// `ExpectedVersion::Exact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgWriteModel {
    base: WriteModelBase,
    pub state: AggregateState,
    pub name: String,
    pub domains: BTreeMap<String, OrgDomainEntry>,
    pub primary_domain: Option<String>,
    /// user id → roles
    pub members: BTreeMap<String, Vec<String>>,
}

impl OrgWriteModel {
    pub fn new(instance_id: &str, org_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(org_id, instance_id, org_id),
            state: AggregateState::Unspecified,
            name: String::new(),
            domains: BTreeMap::new(),
            primary_domain: None,
            members: BTreeMap::new(),
        }
    }

    pub fn verified_domains(&self) -> Vec<String> {
        self.domains
            .iter()
            .filter(|(_, d)| d.verified)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn aggregate(&self) -> AggregateRef {
        aggregate(&self.base.instance_id, &self.base.aggregate_id)
    }

    /// Org lookups from other aggregates: removed counts as missing, inactive
    /// orgs accept no new content.
    pub(crate) fn ensure_active(&self) -> CommandResult<()> {
        match self.state {
            AggregateState::Active => Ok(()),
            AggregateState::Inactive => Err(CommandError::precondition_failed("Errors.Org.NotActive")),
            AggregateState::Unspecified | AggregateState::Removed => {
                Err(CommandError::not_found("Errors.Org.NotFound"))
            }
        }
    }
}

impl WriteModel<IamEvent> for OrgWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(&self.base.instance_id)
            .add_query()
            .aggregate_types([AGGREGATE_TYPE])
            .aggregate_ids([&self.base.aggregate_id])
            .build()
    }

    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn apply(&mut self, event: &Event<IamEvent>) {
        match event.payload() {
            IamEvent::OrgAdded(e) => {
                self.state = AggregateState::Active;
                self.name = e.name.clone();
            }
            IamEvent::OrgChanged(e) => self.name = e.name.clone(),
            IamEvent::OrgDeactivated(_) => self.state = AggregateState::Inactive,
            IamEvent::OrgReactivated(_) => self.state = AggregateState::Active,
            IamEvent::OrgRemoved(_) => {
                self.state = AggregateState::Removed;
                self.domains.clear();
                self.primary_domain = None;
                self.members.clear();
            }
            IamEvent::OrgDomainAdded(e) => {
                self.domains.insert(e.domain.clone(), OrgDomainEntry::default());
            }
            IamEvent::OrgDomainVerified(e) => {
                if let Some(domain) = self.domains.get_mut(&e.domain) {
                    domain.verified = true;
                }
            }
            IamEvent::OrgDomainPrimarySet(e) => {
                for (name, domain) in self.domains.iter_mut() {
                    domain.primary = *name == e.domain;
                }
                self.primary_domain = Some(e.domain.clone());
            }
            IamEvent::OrgDomainRemoved(e) => {
                self.domains.remove(&e.domain);
                if self.primary_domain.as_deref() == Some(e.domain.as_str()) {
                    self.primary_domain = None;
                }
            }
            IamEvent::OrgMemberAdded(e) => {
                self.members.insert(e.user_id.clone(), e.roles.clone());
            }
            IamEvent::OrgMemberChanged(e) => {
                self.members.insert(e.user_id.clone(), e.roles.clone());
            }
            IamEvent::OrgMemberRemoved(e) | IamEvent::OrgMemberCascadeRemoved(e) => {
                self.members.remove(&e.user_id);
            }
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// Creates an org together with its verified, primary default domain.
#[derive(Debug, Clone)]
pub struct AddOrg {
    pub authz: Authz,
    pub instance_id: String,
    /// Domain the instance was reached under; suffix of the default domain.
    pub instance_domain: String,
    pub org_id: String,
    pub name: String,
}

#[async_trait]
impl Preparation<IamEvent> for AddOrg {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        require(&self.name, "Errors.Org.Invalid")?;
        require(&self.instance_domain, "Errors.Instance.Domain.Missing")?;
        default_org_domain(&self.name, &self.instance_domain)?;
        Ok(())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_CREATE, &Scope::instance(&self.instance_id))?;

        // the instance may still be pending in the same batch
        let instance = load(reads, InstanceWriteModel::new(&self.instance_id)).await?;
        instance.ensure_exists()?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        // ids are never reused, not even after removal
        if org.state != AggregateState::Unspecified {
            return Err(CommandError::already_exists("Errors.Org.AlreadyExisting"));
        }

        let domain = default_org_domain(&self.name, &self.instance_domain)?;
        let agg = org.aggregate();
        let expected = org.base().expected_version();
        let events = vec![
            IamEvent::OrgAdded(OrgAdded {
                name: self.name.trim().to_string(),
            }),
            IamEvent::OrgDomainAdded(OrgDomainAdded {
                domain: domain.clone(),
            }),
            IamEvent::OrgDomainVerified(OrgDomainVerified {
                domain: domain.clone(),
            }),
            IamEvent::OrgDomainPrimarySet(OrgDomainPrimarySet { domain }),
        ];
        Ok(events
            .into_iter()
            .map(|e| PendingEvent::new(agg.clone(), e).expect(expected))
            .collect())
    }
}

/// Renames an org. Its default domain follows the new name.
#[derive(Debug, Clone)]
pub struct ChangeOrg {
    pub authz: Authz,
    pub instance_id: String,
    pub instance_domain: String,
    pub org_id: String,
    pub name: String,
}

#[async_trait]
impl Preparation<IamEvent> for ChangeOrg {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        require(&self.name, "Errors.Org.Invalid")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        if !org.state.exists() {
            return Err(CommandError::not_found("Errors.Org.NotFound"));
        }
        let name = self.name.trim();
        if org.name == name {
            return Err(CommandError::not_changed());
        }

        let agg = org.aggregate();
        let expected = org.base().expected_version();
        let mut events = vec![IamEvent::OrgChanged(OrgChanged {
            name: name.to_string(),
            old_name: org.name.clone(),
        })];
        events.extend(self.replace_default_domain(&org, name)?);

        Ok(events
            .into_iter()
            .map(|e| PendingEvent::new(agg.clone(), e).expect(expected))
            .collect())
    }
}

impl ChangeOrg {
    /// If the org still has its old default domain, issue the new one and drop
    /// the old. Primary status moves along.
    fn replace_default_domain(&self, org: &OrgWriteModel, new_name: &str) -> CommandResult<Vec<IamEvent>> {
        let Ok(old_default) = default_org_domain(&org.name, &self.instance_domain) else {
            return Ok(Vec::new());
        };
        let Some(old_entry) = org.domains.get(&old_default) else {
            return Ok(Vec::new());
        };
        let new_default = default_org_domain(new_name, &self.instance_domain)?;
        if new_default == old_default {
            return Ok(Vec::new());
        }

        let mut events = vec![
            IamEvent::OrgDomainAdded(OrgDomainAdded {
                domain: new_default.clone(),
            }),
            IamEvent::OrgDomainVerified(OrgDomainVerified {
                domain: new_default.clone(),
            }),
        ];
        if old_entry.primary {
            events.push(IamEvent::OrgDomainPrimarySet(OrgDomainPrimarySet {
                domain: new_default,
            }));
        }
        events.push(IamEvent::OrgDomainRemoved(OrgDomainRemoved {
            domain: old_default,
            was_verified: old_entry.verified,
        }));
        Ok(events)
    }
}

#[derive(Debug, Clone)]
pub struct DeactivateOrg {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for DeactivateOrg {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        match org.state {
            AggregateState::Active => {}
            AggregateState::Inactive => {
                return Err(CommandError::precondition_failed("Errors.Org.AlreadyDeactivated"));
            }
            AggregateState::Unspecified | AggregateState::Removed => {
                return Err(CommandError::not_found("Errors.Org.NotFound"));
            }
        }

        Ok(vec![
            PendingEvent::new(org.aggregate(), IamEvent::OrgDeactivated(OrgDeactivated {}))
                .expect(org.base().expected_version()),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct ReactivateOrg {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for ReactivateOrg {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        match org.state {
            AggregateState::Inactive => {}
            AggregateState::Active => {
                return Err(CommandError::precondition_failed("Errors.Org.NotInactive"));
            }
            AggregateState::Unspecified | AggregateState::Removed => {
                return Err(CommandError::not_found("Errors.Org.NotFound"));
            }
        }

        Ok(vec![
            PendingEvent::new(org.aggregate(), IamEvent::OrgReactivated(OrgReactivated {}))
                .expect(org.base().expected_version()),
        ])
    }
}

/// Removes an org and releases every unique claim it holds, including the
/// usernames of its users.
#[derive(Debug, Clone)]
pub struct RemoveOrg {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for RemoveOrg {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_DELETE, &Scope::org(&self.instance_id, &self.org_id))?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        if !org.state.exists() {
            return Err(CommandError::not_found("Errors.Org.NotFound"));
        }

        let instance = load(reads, InstanceWriteModel::new(&self.instance_id)).await?;
        if instance.default_org_id.as_deref() == Some(self.org_id.as_str()) {
            return Err(CommandError::precondition_failed("Errors.Org.DefaultOrgNotDeletable"));
        }

        let usernames = org_usernames(reads, &self.instance_id, &self.org_id).await?;
        let removed = OrgRemoved {
            name: org.name.clone(),
            usernames,
            verified_domains: org.verified_domains(),
            member_user_ids: org.members.keys().cloned().collect(),
        };

        Ok(vec![
            PendingEvent::new(org.aggregate(), IamEvent::OrgRemoved(removed))
                .expect(org.base().expected_version()),
        ])
    }
}

/// Usernames currently held by users of `org_id`, by replaying the username
/// relevant user events of that org in order.
pub async fn org_usernames(
    reads: &dyn ReadSet<IamEvent>,
    instance_id: &str,
    org_id: &str,
) -> CommandResult<Vec<OrgUsername>> {
    let query = SearchQuery::builder()
        .instance_id(instance_id)
        .owner(org_id)
        .add_query()
        .aggregate_types([user::AGGREGATE_TYPE])
        .event_types([
            types::USER_HUMAN_ADDED,
            types::USER_USERNAME_CHANGED,
            types::USER_REMOVED,
        ])
        .build();

    let mut by_user: BTreeMap<String, OrgUsername> = BTreeMap::new();
    for event in reads.filter(&query).await? {
        let user_id = &event.aggregate().id;
        match event.payload() {
            IamEvent::HumanAdded(e) => {
                by_user.insert(
                    user_id.clone(),
                    OrgUsername {
                        username: e.username.clone(),
                        login_must_be_domain: e.login_must_be_domain,
                    },
                );
            }
            IamEvent::UsernameChanged(e) => {
                if let Some(entry) = by_user.get_mut(user_id) {
                    entry.username = e.username.clone();
                }
            }
            IamEvent::UserRemoved(_) => {
                by_user.remove(user_id);
            }
            _ => {}
        }
    }
    Ok(by_user.into_values().collect())
}
