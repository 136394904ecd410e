//! Org memberships: a user holding roles inside an org.

use std::collections::BTreeSet;

use async_trait::async_trait;

use irongate_auth::{Permission, Scope};
use irongate_core::{AggregateRef, CommandError, CommandResult};
use irongate_events::{
    load, AggregateState, Event, PendingEvent, Preparation, ReadSet, SearchQuery, WriteModel,
    WriteModelBase,
};

use crate::authz::Authz;
use crate::event::{types, *};
use crate::org::{self, OrgWriteModel};
use crate::user::load_user;
use crate::validation::require;

/// Roles assignable on an org.
pub const ORG_ROLES: &[&str] = &["ORG_OWNER", "ORG_USER_MANAGER"];

fn validate_roles(roles: &[String]) -> CommandResult<Vec<String>> {
    if roles.is_empty() {
        return Err(CommandError::invalid_argument("Errors.Org.Member.RolesMissing"));
    }
    let mut unique = BTreeSet::new();
    for role in roles {
        let role = role.trim();
        if !ORG_ROLES.contains(&role) {
            return Err(CommandError::invalid_argument("Errors.Org.Member.InvalidRole"));
        }
        unique.insert(role.to_string());
    }
    Ok(unique.into_iter().collect())
}

/// One (org, user) membership. Pushes based on it use `ExpectedVersion::Any`;
/// the member unique constraint guards against a concurrent double add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgMemberWriteModel {
    base: WriteModelBase,
    pub user_id: String,
    pub state: AggregateState,
    pub roles: Vec<String>,
}

impl OrgMemberWriteModel {
    pub fn new(instance_id: &str, org_id: &str, user_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(org_id, instance_id, org_id),
            user_id: user_id.to_string(),
            state: AggregateState::Unspecified,
            roles: Vec::new(),
        }
    }

    fn aggregate(&self) -> AggregateRef {
        org::aggregate(&self.base.instance_id, &self.base.aggregate_id)
    }
}

impl WriteModel<IamEvent> for OrgMemberWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(&self.base.instance_id)
            .add_query()
            .aggregate_types([org::AGGREGATE_TYPE])
            .aggregate_ids([&self.base.aggregate_id])
            .event_types([
                types::ORG_MEMBER_ADDED,
                types::ORG_MEMBER_CHANGED,
                types::ORG_MEMBER_REMOVED,
                types::ORG_MEMBER_CASCADE_REMOVED,
                types::ORG_REMOVED,
            ])
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
            IamEvent::OrgMemberAdded(e) if e.user_id == self.user_id => {
                self.state = AggregateState::Active;
                self.roles = e.roles.clone();
            }
            IamEvent::OrgMemberChanged(e) if e.user_id == self.user_id => {
                self.roles = e.roles.clone();
            }
            IamEvent::OrgMemberRemoved(e) | IamEvent::OrgMemberCascadeRemoved(e)
                if e.user_id == self.user_id =>
            {
                self.state = AggregateState::Removed;
                self.roles.clear();
            }
            IamEvent::OrgRemoved(_) => {
                self.state = AggregateState::Removed;
                self.roles.clear();
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct AddOrgMember {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
}

#[async_trait]
impl Preparation<IamEvent> for AddOrgMember {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        require(&self.user_id, "Errors.User.IdMissing")?;
        validate_roles(&self.roles).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz.require(
            &Permission::ORG_MEMBER_WRITE,
            &Scope::org(&self.instance_id, &self.org_id),
        )?;
        let roles = validate_roles(&self.roles)?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        if !org.state.exists() {
            return Err(CommandError::not_found("Errors.Org.NotFound"));
        }
        let user = load_user(reads, &self.instance_id, &self.user_id).await?;
        match user.state {
            AggregateState::Unspecified => return Err(CommandError::not_found("Errors.User.NotFound")),
            AggregateState::Removed => return Err(CommandError::precondition_failed("Errors.User.Removed")),
            AggregateState::Active | AggregateState::Inactive => {}
        }

        let member = load(
            reads,
            OrgMemberWriteModel::new(&self.instance_id, &self.org_id, &self.user_id),
        )
        .await?;
        if member.state == AggregateState::Active {
            return Err(CommandError::already_exists("Errors.Org.Member.AlreadyExists"));
        }

        Ok(vec![PendingEvent::new(
            member.aggregate(),
            IamEvent::OrgMemberAdded(MemberAdded {
                user_id: self.user_id.clone(),
                roles,
            }),
        )])
    }
}

#[derive(Debug, Clone)]
pub struct ChangeOrgMember {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
}

#[async_trait]
impl Preparation<IamEvent> for ChangeOrgMember {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        require(&self.user_id, "Errors.User.IdMissing")?;
        validate_roles(&self.roles).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz.require(
            &Permission::ORG_MEMBER_WRITE,
            &Scope::org(&self.instance_id, &self.org_id),
        )?;
        let roles = validate_roles(&self.roles)?;

        let member = load(
            reads,
            OrgMemberWriteModel::new(&self.instance_id, &self.org_id, &self.user_id),
        )
        .await?;
        if member.state != AggregateState::Active {
            return Err(CommandError::not_found("Errors.Org.Member.NotFound"));
        }
        let current: BTreeSet<&String> = member.roles.iter().collect();
        let wanted: BTreeSet<&String> = roles.iter().collect();
        if current == wanted {
            return Err(CommandError::not_changed());
        }

        Ok(vec![PendingEvent::new(
            member.aggregate(),
            IamEvent::OrgMemberChanged(MemberChanged {
                user_id: self.user_id.clone(),
                roles,
            }),
        )])
    }
}

#[derive(Debug, Clone)]
pub struct RemoveOrgMember {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub user_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for RemoveOrgMember {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        require(&self.user_id, "Errors.User.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz.require(
            &Permission::ORG_MEMBER_WRITE,
            &Scope::org(&self.instance_id, &self.org_id),
        )?;

        let member = load(
            reads,
            OrgMemberWriteModel::new(&self.instance_id, &self.org_id, &self.user_id),
        )
        .await?;
        match member.state {
            AggregateState::Active | AggregateState::Inactive => {}
            AggregateState::Unspecified => {
                return Err(CommandError::not_found("Errors.Org.Member.NotFound"));
            }
            AggregateState::Removed => {
                return Err(CommandError::precondition_failed("Errors.Org.Member.AlreadyRemoved"));
            }
        }

        Ok(vec![PendingEvent::new(
            member.aggregate(),
            IamEvent::OrgMemberRemoved(MemberRemoved {
                user_id: self.user_id.clone(),
            }),
        )])
    }
}

#[cfg(test)]
mod tests {
    use irongate_core::ExpectedVersion;

    use super::*;
    use crate::testing::*;

    fn with_user() -> Vec<(AggregateRef, IamEvent)> {
        let mut h = acme_added();
        h.push(human_added("user-1", "org-1", "ada"));
        h
    }

    fn add(roles: &[&str]) -> AddOrgMember {
        AddOrgMember {
            authz: org_owner("org-1"),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            user_id: "user-1".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn member_added() -> (AggregateRef, IamEvent) {
        (
            org_agg("org-1"),
            IamEvent::OrgMemberAdded(MemberAdded {
                user_id: "user-1".into(),
                roles: vec!["ORG_OWNER".into()],
            }),
        )
    }

    #[tokio::test]
    async fn add_member_dedupes_roles() {
        let events = add(&["ORG_OWNER", "ORG_OWNER", "ORG_USER_MANAGER"])
            .prepare(&history(with_user()))
            .await
            .unwrap();
        assert_eq!(
            payloads(&events),
            vec![IamEvent::OrgMemberAdded(MemberAdded {
                user_id: "user-1".into(),
                roles: vec!["ORG_OWNER".into(), "ORG_USER_MANAGER".into()],
            })]
        );
        assert_eq!(events[0].expected(), ExpectedVersion::Any);
        assert_eq!(events[0].unique_constraints()[0].unique_field, "org-1:user-1");
    }

    #[test]
    fn unknown_or_missing_roles_are_invalid() {
        assert!(add(&[]).validate().unwrap_err().is_invalid_argument());
        assert!(add(&["IAM_OWNER"]).validate().unwrap_err().is_invalid_argument());
    }

    #[tokio::test]
    async fn add_member_checks_org_and_user() {
        let step = add(&["ORG_OWNER"]);
        assert_eq!(
            step.prepare(&empty()).await.unwrap_err().message(),
            "Errors.Org.NotFound"
        );
        assert_eq!(
            step.prepare(&history(acme_added())).await.unwrap_err().message(),
            "Errors.User.NotFound"
        );

        let mut h = with_user();
        h.push((
            user_agg("user-1", "org-1"),
            IamEvent::UserRemoved(UserRemoved {
                username: "ada".into(),
                login_must_be_domain: true,
            }),
        ));
        assert!(step.prepare(&history(h)).await.unwrap_err().is_precondition_failed());
    }

    #[tokio::test]
    async fn removed_member_can_be_added_again() {
        let mut h = with_user();
        h.push(member_added());
        let step = add(&["ORG_OWNER"]);
        assert!(step.prepare(&history(h.clone())).await.unwrap_err().is_already_exists());

        h.push((
            org_agg("org-1"),
            IamEvent::OrgMemberRemoved(MemberRemoved {
                user_id: "user-1".into(),
            }),
        ));
        assert_eq!(step.prepare(&history(h)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn change_member_roles() {
        let mut h = with_user();
        h.push(member_added());
        let change = |roles: &[&str]| ChangeOrgMember {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            user_id: "user-1".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };

        let err = change(&["ORG_OWNER"]).prepare(&history(h.clone())).await.unwrap_err();
        assert!(err.is_precondition_failed());

        let events = change(&["ORG_USER_MANAGER"]).prepare(&history(h)).await.unwrap();
        assert_eq!(events[0].event_type(), types::ORG_MEMBER_CHANGED);

        let err = change(&["ORG_OWNER"])
            .prepare(&history(with_user()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn remove_member_twice_is_precondition_failed() {
        let step = RemoveOrgMember {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            user_id: "user-1".into(),
        };
        assert!(step.prepare(&history(with_user())).await.unwrap_err().is_not_found());

        let mut h = with_user();
        h.push(member_added());
        let events = step.prepare(&history(h.clone())).await.unwrap();
        assert_eq!(events[0].unique_constraints()[0].action, irongate_events::UniqueAction::Remove);

        h.push((org_agg("org-1"), events[0].payload().clone()));
        let err = step.prepare(&history(h)).await.unwrap_err();
        assert_eq!(err.message(), "Errors.Org.Member.AlreadyRemoved");
    }

    #[tokio::test]
    async fn member_added_after_org_in_same_batch() {
        use irongate_events::prepare_commands;

        let org = crate::AddOrg {
            authz: admin(),
            instance_id: INSTANCE.into(),
            instance_domain: INSTANCE_DOMAIN.into(),
            org_id: "org-1".into(),
            name: "Acme".into(),
        };
        let user = crate::AddHumanUser {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            user_id: "user-1".into(),
            username: "ada".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@mail.example".into(),
            policy: crate::DomainPolicy::default(),
        };
        let member = add(&["ORG_OWNER"]);

        let steps: [&dyn Preparation<IamEvent>; 3] = [&org, &user, &member];
        let events = prepare_commands::<IamEvent>(&history(vec![instance_created()]), &steps)
            .await
            .unwrap();
        let emitted: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            emitted,
            [
                types::ORG_ADDED,
                types::ORG_DOMAIN_ADDED,
                types::ORG_DOMAIN_VERIFIED,
                types::ORG_DOMAIN_PRIMARY_SET,
                types::USER_HUMAN_ADDED,
                types::ORG_MEMBER_ADDED,
            ]
        );
    }
}
