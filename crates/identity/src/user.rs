//! Human users.
//!
//! A user belongs to exactly one org (its resource owner). Usernames are unique
//! per org when the domain policy makes the org's domain part of the login
//! name, otherwise across the instance.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::debug;

use irongate_auth::{Permission, Scope};
use irongate_core::{AggregateRef, CommandError, CommandResult};
use irongate_events::{
    load, AggregateState, Event, PendingEvent, Preparation, ReadSet, SearchQuery, WriteModel,
    WriteModelBase,
};

use crate::authz::Authz;
use crate::event::{types, *};
use crate::org::{self, OrgWriteModel};
use crate::validation::require;

pub const AGGREGATE_TYPE: &str = "user";

pub fn aggregate(instance_id: &str, user_id: &str, org_id: &str) -> AggregateRef {
    AggregateRef::new(AGGREGATE_TYPE, user_id, instance_id, org_id)
}

/// How login names relate to org domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainPolicy {
    /// Login names are `username@primary-org-domain`; usernames then only need
    /// to be unique inside their org.
    pub user_login_must_be_domain: bool,
}

impl Default for DomainPolicy {
    fn default() -> Self {
        Self {
            user_login_must_be_domain: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserWriteModel {
    base: WriteModelBase,
    pub state: AggregateState,
    pub username: String,
    /// Policy in force when the username was claimed; releases use the same key.
    pub login_must_be_domain: bool,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl UserWriteModel {
    /// `org_id` may be empty; it is filled from the first event.
    pub fn new(instance_id: &str, user_id: &str, org_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(user_id, instance_id, org_id),
            state: AggregateState::Unspecified,
            username: String::new(),
            login_must_be_domain: true,
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
        }
    }

    pub fn org_id(&self) -> &str {
        &self.base.resource_owner
    }

    fn aggregate(&self) -> AggregateRef {
        aggregate(&self.base.instance_id, &self.base.aggregate_id, &self.base.resource_owner)
    }

    fn ensure_exists(&self) -> CommandResult<()> {
        if !self.state.exists() {
            return Err(CommandError::not_found("Errors.User.NotFound"));
        }
        Ok(())
    }
}

impl WriteModel<IamEvent> for UserWriteModel {
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
            IamEvent::HumanAdded(e) => {
                self.state = AggregateState::Active;
                self.username = e.username.clone();
                self.login_must_be_domain = e.login_must_be_domain;
                self.first_name = e.first_name.clone();
                self.last_name = e.last_name.clone();
                self.email = e.email.clone();
            }
            IamEvent::UsernameChanged(e) => {
                self.username = e.username.clone();
                self.login_must_be_domain = e.login_must_be_domain;
            }
            IamEvent::UserDeactivated(_) => self.state = AggregateState::Inactive,
            IamEvent::UserReactivated(_) => self.state = AggregateState::Active,
            IamEvent::UserRemoved(_) => self.state = AggregateState::Removed,
            _ => {}
        }
    }
}

fn validate_username(username: &str) -> CommandResult<()> {
    require(username, "Errors.User.Username.Empty")?;
    if username.trim().chars().any(char::is_whitespace) {
        return Err(CommandError::invalid_argument("Errors.User.Username.Invalid"));
    }
    Ok(())
}

/// Verified org domains of the instance, mapped to the org that verified them.
async fn verified_domains(
    reads: &dyn ReadSet<IamEvent>,
    instance_id: &str,
) -> CommandResult<BTreeMap<String, String>> {
    let query = SearchQuery::builder()
        .instance_id(instance_id)
        .add_query()
        .aggregate_types([org::AGGREGATE_TYPE])
        .event_types([
            types::ORG_DOMAIN_VERIFIED,
            types::ORG_DOMAIN_REMOVED,
            types::ORG_REMOVED,
        ])
        .build();

    let mut domains = BTreeMap::new();
    for event in reads.filter(&query).await? {
        let org_id = &event.aggregate().id;
        match event.payload() {
            IamEvent::OrgDomainVerified(e) => {
                domains.insert(e.domain.clone(), org_id.clone());
            }
            IamEvent::OrgDomainRemoved(e) => {
                domains.remove(&e.domain);
            }
            IamEvent::OrgRemoved(_) => domains.retain(|_, owner| owner != org_id),
            _ => {}
        }
    }
    Ok(domains)
}

/// Rejects `name@domain` usernames whose domain another org verified, when
/// usernames are not suffixed with the org domain anyway.
async fn check_username_domain(
    reads: &dyn ReadSet<IamEvent>,
    instance_id: &str,
    org_id: &str,
    username: &str,
    login_must_be_domain: bool,
) -> CommandResult<()> {
    if login_must_be_domain {
        return Ok(());
    }
    let Some((_, domain)) = username.rsplit_once('@') else {
        return Ok(());
    };
    let domain = domain.to_lowercase();
    let domains = verified_domains(reads, instance_id).await?;
    match domains.get(&domain) {
        Some(owner) if owner != org_id => {
            debug!(%domain, owner = %owner, "username uses a domain verified by another org");
            Err(CommandError::invalid_argument("Errors.User.DomainNotAllowedAsUsername"))
        }
        _ => Ok(()),
    }
}

/// Adds a human user to an active org.
#[derive(Debug, Clone)]
pub struct AddHumanUser {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub user_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub policy: DomainPolicy,
}

#[async_trait]
impl Preparation<IamEvent> for AddHumanUser {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        require(&self.user_id, "Errors.User.IdMissing")?;
        validate_username(&self.username)?;
        require(&self.first_name, "Errors.User.Profile.FirstNameEmpty")?;
        require(&self.last_name, "Errors.User.Profile.LastNameEmpty")?;
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(CommandError::invalid_argument("Errors.User.Email.Invalid")),
        }
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::USER_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        org.ensure_active()?;

        let user = load(
            reads,
            UserWriteModel::new(&self.instance_id, &self.user_id, &self.org_id),
        )
        .await?;
        if user.state != AggregateState::Unspecified {
            return Err(CommandError::already_exists("Errors.User.AlreadyExisting"));
        }

        let username = self.username.trim().to_string();
        let login_must_be_domain = self.policy.user_login_must_be_domain;
        check_username_domain(reads, &self.instance_id, &self.org_id, &username, login_must_be_domain)
            .await?;

        let added = HumanAdded {
            username,
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            login_must_be_domain,
        };
        Ok(vec![
            PendingEvent::new(
                aggregate(&self.instance_id, &self.user_id, &self.org_id),
                IamEvent::HumanAdded(added),
            )
            .expect(user.base().expected_version()),
        ])
    }
}

/// Loads a user by id. Users of a removed org count as removed: the org's
/// removal already released their usernames.
pub(crate) async fn load_user(
    reads: &dyn ReadSet<IamEvent>,
    instance_id: &str,
    user_id: &str,
) -> CommandResult<UserWriteModel> {
    let mut user = load(reads, UserWriteModel::new(instance_id, user_id, "")).await?;
    if user.state.exists() {
        let org = load(reads, OrgWriteModel::new(instance_id, user.org_id())).await?;
        if org.state == AggregateState::Removed {
            debug!(user_id, org_id = %user.org_id(), "user belongs to a removed org");
            user.state = AggregateState::Removed;
        }
    }
    Ok(user)
}

#[derive(Debug, Clone)]
pub struct ChangeUsername {
    pub authz: Authz,
    pub instance_id: String,
    pub user_id: String,
    pub username: String,
}

#[async_trait]
impl Preparation<IamEvent> for ChangeUsername {
    fn validate(&self) -> CommandResult<()> {
        require(&self.user_id, "Errors.User.IdMissing")?;
        validate_username(&self.username)
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        let user = load_user(reads, &self.instance_id, &self.user_id).await?;
        user.ensure_exists()?;
        self.authz
            .require(&Permission::USER_WRITE, &Scope::org(&self.instance_id, user.org_id()))?;

        let username = self.username.trim();
        if user.username == username {
            return Err(CommandError::precondition_failed("Errors.User.UsernameNotChanged"));
        }
        check_username_domain(
            reads,
            &self.instance_id,
            user.org_id(),
            username,
            user.login_must_be_domain,
        )
        .await?;

        Ok(vec![
            PendingEvent::new(
                user.aggregate(),
                IamEvent::UsernameChanged(UsernameChanged {
                    username: username.to_string(),
                    old_username: user.username.clone(),
                    login_must_be_domain: user.login_must_be_domain,
                }),
            )
            .expect(user.base().expected_version()),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct DeactivateUser {
    pub authz: Authz,
    pub instance_id: String,
    pub user_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for DeactivateUser {
    fn validate(&self) -> CommandResult<()> {
        require(&self.user_id, "Errors.User.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        let user = load_user(reads, &self.instance_id, &self.user_id).await?;
        user.ensure_exists()?;
        self.authz
            .require(&Permission::USER_WRITE, &Scope::org(&self.instance_id, user.org_id()))?;
        if user.state == AggregateState::Inactive {
            return Err(CommandError::precondition_failed("Errors.User.AlreadyInactive"));
        }

        Ok(vec![
            PendingEvent::new(user.aggregate(), IamEvent::UserDeactivated(UserDeactivated {}))
                .expect(user.base().expected_version()),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct ReactivateUser {
    pub authz: Authz,
    pub instance_id: String,
    pub user_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for ReactivateUser {
    fn validate(&self) -> CommandResult<()> {
        require(&self.user_id, "Errors.User.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        let user = load_user(reads, &self.instance_id, &self.user_id).await?;
        user.ensure_exists()?;
        self.authz
            .require(&Permission::USER_WRITE, &Scope::org(&self.instance_id, user.org_id()))?;
        if user.state != AggregateState::Inactive {
            return Err(CommandError::precondition_failed("Errors.User.NotInactive"));
        }

        Ok(vec![
            PendingEvent::new(user.aggregate(), IamEvent::UserReactivated(UserReactivated {}))
                .expect(user.base().expected_version()),
        ])
    }
}

/// Orgs in which `user_id` currently is a member.
async fn memberships(
    reads: &dyn ReadSet<IamEvent>,
    instance_id: &str,
    user_id: &str,
) -> CommandResult<BTreeSet<String>> {
    let query = SearchQuery::builder()
        .instance_id(instance_id)
        .add_query()
        .aggregate_types([org::AGGREGATE_TYPE])
        .event_types([
            types::ORG_MEMBER_ADDED,
            types::ORG_MEMBER_REMOVED,
            types::ORG_MEMBER_CASCADE_REMOVED,
            types::ORG_REMOVED,
        ])
        .build();

    let mut orgs = BTreeSet::new();
    for event in reads.filter(&query).await? {
        let org_id = &event.aggregate().id;
        match event.payload() {
            IamEvent::OrgMemberAdded(e) if e.user_id == user_id => {
                orgs.insert(org_id.clone());
            }
            IamEvent::OrgMemberRemoved(e) | IamEvent::OrgMemberCascadeRemoved(e)
                if e.user_id == user_id =>
            {
                orgs.remove(org_id);
            }
            IamEvent::OrgRemoved(_) => {
                orgs.remove(org_id);
            }
            _ => {}
        }
    }
    Ok(orgs)
}

/// Removes a user, releases its username and drops it from every org it is a
/// member of, in one batch.
#[derive(Debug, Clone)]
pub struct RemoveUser {
    pub authz: Authz,
    pub instance_id: String,
    pub user_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for RemoveUser {
    fn validate(&self) -> CommandResult<()> {
        require(&self.user_id, "Errors.User.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        let user = load_user(reads, &self.instance_id, &self.user_id).await?;
        user.ensure_exists()?;
        self.authz
            .require(&Permission::USER_DELETE, &Scope::org(&self.instance_id, user.org_id()))?;

        let mut events = vec![
            PendingEvent::new(
                user.aggregate(),
                IamEvent::UserRemoved(UserRemoved {
                    username: user.username.clone(),
                    login_must_be_domain: user.login_must_be_domain,
                }),
            )
            .expect(user.base().expected_version()),
        ];
        for org_id in memberships(reads, &self.instance_id, &self.user_id).await? {
            events.push(PendingEvent::new(
                org::aggregate(&self.instance_id, &org_id),
                IamEvent::OrgMemberCascadeRemoved(MemberRemoved {
                    user_id: self.user_id.clone(),
                }),
            ));
        }
        Ok(events)
    }
}
