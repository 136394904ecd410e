//! Instance aggregate: the tenant root.
//!
//! An instance is its own resource owner. Its domains are claimed globally,
//! every other unique claim is scoped to the instance.

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
use crate::org::OrgWriteModel;
use crate::validation::{normalize_domain, require};

pub const AGGREGATE_TYPE: &str = "instance";

pub fn aggregate(instance_id: &str) -> AggregateRef {
    AggregateRef::new(AGGREGATE_TYPE, instance_id, instance_id, instance_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceDomainEntry {
    pub generated: bool,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceWriteModel {
    base: WriteModelBase,
    pub state: AggregateState,
    pub name: String,
    pub default_org_id: Option<String>,
    pub domains: BTreeMap<String, InstanceDomainEntry>,
}

impl InstanceWriteModel {
    pub fn new(instance_id: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, instance_id, instance_id),
            state: AggregateState::Unspecified,
            name: String::new(),
            default_org_id: None,
            domains: BTreeMap::new(),
        }
    }

    pub(crate) fn ensure_exists(&self) -> CommandResult<()> {
        if !self.state.exists() {
            return Err(CommandError::not_found("Errors.Instance.NotFound"));
        }
        Ok(())
    }
}

impl WriteModel<IamEvent> for InstanceWriteModel {
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
            IamEvent::InstanceAdded(e) => {
                self.state = AggregateState::Active;
                self.name = e.name.clone();
            }
            IamEvent::InstanceRemoved(_) => {
                self.state = AggregateState::Removed;
                self.default_org_id = None;
                self.domains.clear();
            }
            IamEvent::InstanceDefaultOrgSet(e) => self.default_org_id = Some(e.org_id.clone()),
            IamEvent::InstanceDomainAdded(e) => {
                self.domains.insert(
                    e.domain.clone(),
                    InstanceDomainEntry {
                        generated: e.generated,
                        primary: false,
                    },
                );
            }
            IamEvent::InstanceDomainPrimarySet(e) => {
                for (name, domain) in self.domains.iter_mut() {
                    domain.primary = *name == e.domain;
                }
            }
            IamEvent::InstanceDomainRemoved(e) => {
                self.domains.remove(&e.domain);
            }
            _ => {}
        }
    }
}

/// One domain of an instance. Pushes based on it use `ExpectedVersion::Any`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDomainWriteModel {
    base: WriteModelBase,
    pub domain: String,
    pub state: AggregateState,
    pub generated: bool,
    pub primary: bool,
}

impl InstanceDomainWriteModel {
    pub fn new(instance_id: &str, domain: &str) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, instance_id, instance_id),
            domain: domain.to_string(),
            state: AggregateState::Unspecified,
            generated: false,
            primary: false,
        }
    }

    fn ensure_exists(&self) -> CommandResult<()> {
        if self.state != AggregateState::Active {
            return Err(CommandError::not_found("Errors.Instance.Domain.NotFound"));
        }
        Ok(())
    }
}

impl WriteModel<IamEvent> for InstanceDomainWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(&self.base.instance_id)
            .add_query()
            .aggregate_types([AGGREGATE_TYPE])
            .aggregate_ids([&self.base.aggregate_id])
            .event_types([
                types::INSTANCE_DOMAIN_ADDED,
                types::INSTANCE_DOMAIN_PRIMARY_SET,
                types::INSTANCE_DOMAIN_REMOVED,
                types::INSTANCE_REMOVED,
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
            IamEvent::InstanceDomainAdded(e) if e.domain == self.domain => {
                self.state = AggregateState::Active;
                self.generated = e.generated;
                self.primary = false;
            }
            IamEvent::InstanceDomainPrimarySet(e) => self.primary = e.domain == self.domain,
            IamEvent::InstanceDomainRemoved(e) if e.domain == self.domain => {
                self.state = AggregateState::Removed;
                self.primary = false;
            }
            IamEvent::InstanceRemoved(_) => {
                self.state = AggregateState::Removed;
                self.primary = false;
            }
            _ => {}
        }
    }
}

/// Creates an instance with its generated, primary domain.
#[derive(Debug, Clone)]
pub struct AddInstance {
    pub authz: Authz,
    pub instance_id: String,
    pub name: String,
    pub generated_domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for AddInstance {
    fn validate(&self) -> CommandResult<()> {
        require(&self.instance_id, "Errors.Instance.IdMissing")?;
        require(&self.name, "Errors.Instance.Invalid")?;
        normalize_domain(&self.generated_domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::IAM_WRITE, &Scope::instance(&self.instance_id))?;

        let instance = load(reads, InstanceWriteModel::new(&self.instance_id)).await?;
        if instance.state != AggregateState::Unspecified {
            return Err(CommandError::already_exists("Errors.Instance.AlreadyExists"));
        }

        let domain = normalize_domain(&self.generated_domain)?;
        let agg = aggregate(&self.instance_id);
        let expected = instance.base().expected_version();
        let events = vec![
            IamEvent::InstanceAdded(InstanceAdded {
                name: self.name.trim().to_string(),
            }),
            IamEvent::InstanceDomainAdded(InstanceDomainAdded {
                domain: domain.clone(),
                generated: true,
            }),
            IamEvent::InstanceDomainPrimarySet(InstanceDomainPrimarySet { domain }),
        ];
        Ok(events
            .into_iter()
            .map(|e| PendingEvent::new(agg.clone(), e).expect(expected))
            .collect())
    }
}

/// Removes an instance and every claim scoped to it.
#[derive(Debug, Clone)]
pub struct RemoveInstance {
    pub authz: Authz,
    pub instance_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for RemoveInstance {
    fn validate(&self) -> CommandResult<()> {
        require(&self.instance_id, "Errors.Instance.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::IAM_WRITE, &Scope::instance(&self.instance_id))?;

        let instance = load(reads, InstanceWriteModel::new(&self.instance_id)).await?;
        instance.ensure_exists()?;

        let removed = InstanceRemoved {
            name: instance.name.clone(),
            domains: instance.domains.keys().cloned().collect(),
        };
        Ok(vec![
            PendingEvent::new(aggregate(&self.instance_id), IamEvent::InstanceRemoved(removed))
                .expect(instance.base().expected_version()),
        ])
    }
}

/// Sets the org users land in when no org is given.
#[derive(Debug, Clone)]
pub struct SetDefaultOrg {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
}

#[async_trait]
impl Preparation<IamEvent> for SetDefaultOrg {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::IAM_WRITE, &Scope::instance(&self.instance_id))?;

        let instance = load(reads, InstanceWriteModel::new(&self.instance_id)).await?;
        instance.ensure_exists()?;
        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        if !org.state.exists() {
            return Err(CommandError::not_found("Errors.Org.NotFound"));
        }
        if instance.default_org_id.as_deref() == Some(self.org_id.as_str()) {
            return Err(CommandError::not_changed());
        }

        Ok(vec![
            PendingEvent::new(
                aggregate(&self.instance_id),
                IamEvent::InstanceDefaultOrgSet(InstanceDefaultOrgSet {
                    org_id: self.org_id.clone(),
                }),
            )
            .expect(instance.base().expected_version()),
        ])
    }
}

#[derive(Debug, Clone)]
pub struct AddInstanceDomain {
    pub authz: Authz,
    pub instance_id: String,
    pub domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for AddInstanceDomain {
    fn validate(&self) -> CommandResult<()> {
        normalize_domain(&self.domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::IAM_WRITE, &Scope::instance(&self.instance_id))?;
        let domain = normalize_domain(&self.domain)?;

        let instance = load(reads, InstanceWriteModel::new(&self.instance_id)).await?;
        instance.ensure_exists()?;
        let model = load(reads, InstanceDomainWriteModel::new(&self.instance_id, &domain)).await?;
        if model.state == AggregateState::Active {
            return Err(CommandError::already_exists("Errors.Instance.Domain.AlreadyExists"));
        }

        Ok(vec![PendingEvent::new(
            aggregate(&self.instance_id),
            IamEvent::InstanceDomainAdded(InstanceDomainAdded {
                domain,
                generated: false,
            }),
        )])
    }
}

#[derive(Debug, Clone)]
pub struct SetPrimaryInstanceDomain {
    pub authz: Authz,
    pub instance_id: String,
    pub domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for SetPrimaryInstanceDomain {
    fn validate(&self) -> CommandResult<()> {
        normalize_domain(&self.domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::IAM_WRITE, &Scope::instance(&self.instance_id))?;
        let domain = normalize_domain(&self.domain)?;

        let model = load(reads, InstanceDomainWriteModel::new(&self.instance_id, &domain)).await?;
        model.ensure_exists()?;
        if model.primary {
            return Err(CommandError::not_changed());
        }

        Ok(vec![PendingEvent::new(
            aggregate(&self.instance_id),
            IamEvent::InstanceDomainPrimarySet(InstanceDomainPrimarySet { domain }),
        )])
    }
}

#[derive(Debug, Clone)]
pub struct RemoveInstanceDomain {
    pub authz: Authz,
    pub instance_id: String,
    pub domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for RemoveInstanceDomain {
    fn validate(&self) -> CommandResult<()> {
        normalize_domain(&self.domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::IAM_WRITE, &Scope::instance(&self.instance_id))?;
        let domain = normalize_domain(&self.domain)?;

        let model = load(reads, InstanceDomainWriteModel::new(&self.instance_id, &domain)).await?;
        model.ensure_exists()?;
        if model.generated {
            return Err(CommandError::precondition_failed(
                "Errors.Instance.Domain.GeneratedNotRemovable",
            ));
        }
        if model.primary {
            return Err(CommandError::precondition_failed(
                "Errors.Instance.Domain.PrimaryNotRemovable",
            ));
        }

        Ok(vec![PendingEvent::new(
            aggregate(&self.instance_id),
            IamEvent::InstanceDomainRemoved(InstanceDomainRemoved { domain }),
        )])
    }
}

#[cfg(test)]
mod tests {
    use irongate_core::ExpectedVersion;
    use irongate_events::{ConstraintScope, UniqueAction};

    use super::*;
    use crate::testing::*;

    fn instance_added() -> Vec<(AggregateRef, IamEvent)> {
        vec![
            (
                instance_agg(),
                IamEvent::InstanceAdded(InstanceAdded { name: "Test".into() }),
            ),
            (
                instance_agg(),
                IamEvent::InstanceDomainAdded(InstanceDomainAdded {
                    domain: INSTANCE_DOMAIN.into(),
                    generated: true,
                }),
            ),
            (
                instance_agg(),
                IamEvent::InstanceDomainPrimarySet(InstanceDomainPrimarySet {
                    domain: INSTANCE_DOMAIN.into(),
                }),
            ),
        ]
    }

    fn add_instance() -> AddInstance {
        AddInstance {
            authz: admin(),
            instance_id: INSTANCE.into(),
            name: "Test".into(),
            generated_domain: INSTANCE_DOMAIN.into(),
        }
    }

    #[tokio::test]
    async fn add_instance_claims_generated_domain_globally() {
        let events = add_instance().prepare(&empty()).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.expected() == ExpectedVersion::Exact(0)));

        let claim = &events[1].unique_constraints()[0];
        assert_eq!(claim.scope, ConstraintScope::Global);
        assert_eq!(claim.action, UniqueAction::Add);
    }

    #[tokio::test]
    async fn add_instance_twice_fails() {
        let err = add_instance()
            .prepare(&history(instance_added()))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn add_instance_requires_iam_write() {
        let mut step = add_instance();
        step.authz = org_owner("org-1");
        assert!(step.prepare(&empty()).await.unwrap_err().is_permission_denied());
    }

    #[tokio::test]
    async fn custom_domain_lifecycle() {
        let add = AddInstanceDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            domain: "Login.Example".into(),
        };
        let events = add.prepare(&history(instance_added())).await.unwrap();
        assert_eq!(
            payloads(&events),
            vec![IamEvent::InstanceDomainAdded(InstanceDomainAdded {
                domain: "login.example".into(),
                generated: false,
            })]
        );
        assert_eq!(events[0].expected(), ExpectedVersion::Any);

        let mut h = instance_added();
        h.push((instance_agg(), events[0].payload().clone()));
        assert!(add.prepare(&history(h.clone())).await.unwrap_err().is_already_exists());

        let remove = RemoveInstanceDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            domain: "login.example".into(),
        };
        assert_eq!(remove.prepare(&history(h.clone())).await.unwrap().len(), 1);

        let primary = SetPrimaryInstanceDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            domain: "login.example".into(),
        };
        let set = primary.prepare(&history(h.clone())).await.unwrap();
        h.push((instance_agg(), set[0].payload().clone()));

        assert!(primary.prepare(&history(h.clone())).await.unwrap_err().is_precondition_failed());
        let err = remove.prepare(&history(h)).await.unwrap_err();
        assert_eq!(err.message(), "Errors.Instance.Domain.PrimaryNotRemovable");
    }

    #[tokio::test]
    async fn generated_domain_is_not_removable() {
        let mut h = instance_added();
        h.push((
            instance_agg(),
            IamEvent::InstanceDomainAdded(InstanceDomainAdded {
                domain: "other.example".into(),
                generated: false,
            }),
        ));
        h.push((
            instance_agg(),
            IamEvent::InstanceDomainPrimarySet(InstanceDomainPrimarySet {
                domain: "other.example".into(),
            }),
        ));
        let remove = RemoveInstanceDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            domain: INSTANCE_DOMAIN.into(),
        };
        let err = remove.prepare(&history(h)).await.unwrap_err();
        assert_eq!(err.message(), "Errors.Instance.Domain.GeneratedNotRemovable");
    }

    #[tokio::test]
    async fn set_default_org_needs_existing_org() {
        let step = SetDefaultOrg {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
        };
        assert!(step.prepare(&history(instance_added())).await.unwrap_err().is_not_found());

        let mut h = instance_added();
        h.extend(acme_added());
        let events = step.prepare(&history(h.clone())).await.unwrap();
        assert_eq!(events[0].expected(), ExpectedVersion::Exact(3));

        h.push((instance_agg(), events[0].payload().clone()));
        assert!(step.prepare(&history(h)).await.unwrap_err().is_precondition_failed());
    }

    #[tokio::test]
    async fn remove_instance_releases_domains() {
        let step = RemoveInstance {
            authz: admin(),
            instance_id: INSTANCE.into(),
        };
        assert!(step.prepare(&empty()).await.unwrap_err().is_not_found());

        let events = step.prepare(&history(instance_added())).await.unwrap();
        let actions: Vec<_> = events[0]
            .unique_constraints()
            .iter()
            .map(|c| c.action)
            .collect();
        assert_eq!(actions, [UniqueAction::RemoveInstance, UniqueAction::Remove]);
    }
}
