//! Custom domains of an org.
//!
//! [`OrgDomainWriteModel`] only reads the events of one domain name (plus the
//! org's removal). Adding and verifying push with `ExpectedVersion::Any`: an
//! unrelated org change must not fail them, and uniqueness of verified domains
//! is enforced by the store's constraints. Setting the primary domain and
//! removing a domain depend on which domain is primary, so they push against
//! the org's whole stream.

use async_trait::async_trait;

use irongate_auth::{Permission, Scope};
use irongate_core::{AggregateRef, CommandError, CommandResult, ExpectedVersion};
use irongate_events::{
    load, AggregateState, Event, PendingEvent, Preparation, ReadSet, SearchQuery, WriteModel,
    WriteModelBase,
};

use crate::authz::Authz;
use crate::event::{types, *};
use crate::org::{self, OrgWriteModel};
use crate::validation::{normalize_domain, require};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgDomainWriteModel {
    base: WriteModelBase,
    pub domain: String,
    pub state: AggregateState,
    pub verified: bool,
    pub primary: bool,
}

impl OrgDomainWriteModel {
    pub fn new(instance_id: &str, org_id: &str, domain: &str) -> Self {
        Self {
            base: WriteModelBase::new(org_id, instance_id, org_id),
            domain: domain.to_string(),
            state: AggregateState::Unspecified,
            verified: false,
            primary: false,
        }
    }

    fn aggregate(&self) -> AggregateRef {
        org::aggregate(&self.base.instance_id, &self.base.aggregate_id)
    }

    fn ensure_exists(&self) -> CommandResult<()> {
        if self.state != AggregateState::Active {
            return Err(CommandError::not_found("Errors.Org.Domain.NotFound"));
        }
        Ok(())
    }
}

impl WriteModel<IamEvent> for OrgDomainWriteModel {
    fn query(&self) -> SearchQuery {
        SearchQuery::builder()
            .instance_id(&self.base.instance_id)
            .add_query()
            .aggregate_types([org::AGGREGATE_TYPE])
            .aggregate_ids([&self.base.aggregate_id])
            .event_types([
                types::ORG_DOMAIN_ADDED,
                types::ORG_DOMAIN_VERIFIED,
                types::ORG_DOMAIN_PRIMARY_SET,
                types::ORG_DOMAIN_REMOVED,
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
            IamEvent::OrgDomainAdded(e) if e.domain == self.domain => {
                self.state = AggregateState::Active;
                self.verified = false;
                self.primary = false;
            }
            IamEvent::OrgDomainVerified(e) if e.domain == self.domain => self.verified = true,
            // only one primary domain per org
            IamEvent::OrgDomainPrimarySet(e) => self.primary = e.domain == self.domain,
            IamEvent::OrgDomainRemoved(e) if e.domain == self.domain => {
                self.state = AggregateState::Removed;
                self.verified = false;
                self.primary = false;
            }
            IamEvent::OrgRemoved(_) => {
                self.state = AggregateState::Removed;
                self.verified = false;
                self.primary = false;
            }
            _ => {}
        }
    }
}

/// Expectation covering the org's whole stream.
async fn org_version(
    reads: &dyn ReadSet<IamEvent>,
    instance_id: &str,
    org_id: &str,
) -> CommandResult<ExpectedVersion> {
    let org = load(reads, OrgWriteModel::new(instance_id, org_id)).await?;
    Ok(org.base().expected_version())
}

async fn load_domain(
    reads: &dyn ReadSet<IamEvent>,
    instance_id: &str,
    org_id: &str,
    domain: &str,
) -> CommandResult<OrgDomainWriteModel> {
    load(reads, OrgDomainWriteModel::new(instance_id, org_id, domain)).await
}

/// Adds an unverified domain to an org.
#[derive(Debug, Clone)]
pub struct AddOrgDomain {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for AddOrgDomain {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        normalize_domain(&self.domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;
        let domain = normalize_domain(&self.domain)?;

        let org = load(reads, OrgWriteModel::new(&self.instance_id, &self.org_id)).await?;
        if !org.state.exists() {
            return Err(CommandError::not_found("Errors.Org.NotFound"));
        }
        let model = load_domain(reads, &self.instance_id, &self.org_id, &domain).await?;
        if model.state == AggregateState::Active {
            return Err(CommandError::already_exists("Errors.Org.Domain.AlreadyExists"));
        }

        Ok(vec![PendingEvent::new(
            model.aggregate(),
            IamEvent::OrgDomainAdded(OrgDomainAdded { domain }),
        )])
    }
}

/// Marks a domain as verified, claiming it instance-wide.
#[derive(Debug, Clone)]
pub struct VerifyOrgDomain {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for VerifyOrgDomain {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        normalize_domain(&self.domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;
        let domain = normalize_domain(&self.domain)?;

        let model = load_domain(reads, &self.instance_id, &self.org_id, &domain).await?;
        model.ensure_exists()?;
        if model.verified {
            return Err(CommandError::precondition_failed("Errors.Org.Domain.AlreadyVerified"));
        }

        Ok(vec![PendingEvent::new(
            model.aggregate(),
            IamEvent::OrgDomainVerified(OrgDomainVerified { domain }),
        )])
    }
}

#[derive(Debug, Clone)]
pub struct SetPrimaryOrgDomain {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for SetPrimaryOrgDomain {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        normalize_domain(&self.domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;
        let domain = normalize_domain(&self.domain)?;

        let model = load_domain(reads, &self.instance_id, &self.org_id, &domain).await?;
        model.ensure_exists()?;
        if !model.verified {
            return Err(CommandError::precondition_failed("Errors.Org.Domain.NotVerified"));
        }
        if model.primary {
            return Err(CommandError::precondition_failed("Errors.Org.Domain.AlreadyPrimary"));
        }

        let expected = org_version(reads, &self.instance_id, &self.org_id).await?;
        Ok(vec![
            PendingEvent::new(
                model.aggregate(),
                IamEvent::OrgDomainPrimarySet(OrgDomainPrimarySet { domain }),
            )
            .expect(expected),
        ])
    }
}

/// Removes a non-primary domain; a verified one releases its claim.
#[derive(Debug, Clone)]
pub struct RemoveOrgDomain {
    pub authz: Authz,
    pub instance_id: String,
    pub org_id: String,
    pub domain: String,
}

#[async_trait]
impl Preparation<IamEvent> for RemoveOrgDomain {
    fn validate(&self) -> CommandResult<()> {
        require(&self.org_id, "Errors.Org.IdMissing")?;
        normalize_domain(&self.domain).map(|_| ())
    }

    async fn prepare(&self, reads: &dyn ReadSet<IamEvent>) -> CommandResult<Vec<PendingEvent<IamEvent>>> {
        self.authz
            .require(&Permission::ORG_WRITE, &Scope::org(&self.instance_id, &self.org_id))?;
        let domain = normalize_domain(&self.domain)?;

        let model = load_domain(reads, &self.instance_id, &self.org_id, &domain).await?;
        model.ensure_exists()?;
        if model.primary {
            return Err(CommandError::precondition_failed("Errors.Org.Domain.PrimaryNotDeletable"));
        }

        let expected = org_version(reads, &self.instance_id, &self.org_id).await?;
        Ok(vec![
            PendingEvent::new(
                model.aggregate(),
                IamEvent::OrgDomainRemoved(OrgDomainRemoved {
                    domain,
                    was_verified: model.verified,
                }),
            )
            .expect(expected),
        ])
    }
}

#[cfg(test)]
mod tests {
    use irongate_events::UniqueAction;

    use super::*;
    use crate::testing::*;

    fn with_domain(verified: bool) -> Vec<(AggregateRef, IamEvent)> {
        let mut h = acme_added();
        h.push((
            org_agg("org-1"),
            IamEvent::OrgDomainAdded(OrgDomainAdded {
                domain: "acme.example".into(),
            }),
        ));
        if verified {
            h.push((
                org_agg("org-1"),
                IamEvent::OrgDomainVerified(OrgDomainVerified {
                    domain: "acme.example".into(),
                }),
            ));
        }
        h
    }

    #[tokio::test]
    async fn add_domain_normalizes_and_pushes_without_version() {
        let step = AddOrgDomain {
            authz: org_owner("org-1"),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: " Acme.Example ".into(),
        };
        let events = step.prepare(&history(acme_added())).await.unwrap();

        assert_eq!(
            payloads(&events),
            vec![IamEvent::OrgDomainAdded(OrgDomainAdded {
                domain: "acme.example".into()
            })]
        );
        assert_eq!(events[0].expected(), ExpectedVersion::Any);
        // unverified domains claim nothing
        assert!(events[0].unique_constraints().is_empty());
    }

    #[tokio::test]
    async fn add_domain_twice_is_already_exists() {
        let step = AddOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: "acme.example".into(),
        };
        let err = step.prepare(&history(with_domain(false))).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn add_domain_to_missing_org_is_not_found() {
        let step = AddOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-9".into(),
            domain: "acme.example".into(),
        };
        assert!(step.prepare(&empty()).await.unwrap_err().is_not_found());
    }

    #[test]
    fn invalid_domain_fails_validation() {
        let step = AddOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: "-bad..domain".into(),
        };
        assert!(step.validate().unwrap_err().is_invalid_argument());
    }

    #[tokio::test]
    async fn verify_claims_domain() {
        let step = VerifyOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: "acme.example".into(),
        };
        let events = step.prepare(&history(with_domain(false))).await.unwrap();
        let claims = events[0].unique_constraints();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].action, UniqueAction::Add);
        assert_eq!(claims[0].unique_field, "acme.example");

        let err = step.prepare(&history(with_domain(true))).await.unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[tokio::test]
    async fn primary_requires_verified_domain() {
        let step = SetPrimaryOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: "acme.example".into(),
        };
        let err = step.prepare(&history(with_domain(false))).await.unwrap_err();
        assert_eq!(err.message(), "Errors.Org.Domain.NotVerified");

        let events = step.prepare(&history(with_domain(true))).await.unwrap();
        assert_eq!(events[0].event_type(), types::ORG_DOMAIN_PRIMARY_SET);
        assert_eq!(events[0].expected(), ExpectedVersion::Exact(6));

        let mut h = with_domain(true);
        h.push((
            org_agg("org-1"),
            IamEvent::OrgDomainPrimarySet(OrgDomainPrimarySet {
                domain: "acme.example".into(),
            }),
        ));
        let err = step.prepare(&history(h)).await.unwrap_err();
        assert_eq!(err.message(), "Errors.Org.Domain.AlreadyPrimary");
    }

    #[tokio::test]
    async fn primary_domain_cannot_be_removed() {
        let step = RemoveOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: "acme.iam.example".into(),
        };
        let err = step.prepare(&history(acme_added())).await.unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[tokio::test]
    async fn remove_releases_verified_claim_only() {
        let remove = |domain: &str| RemoveOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: domain.into(),
        };

        let events = remove("acme.example")
            .prepare(&history(with_domain(true)))
            .await
            .unwrap();
        assert_eq!(events[0].unique_constraints()[0].action, UniqueAction::Remove);
        assert_eq!(events[0].expected(), ExpectedVersion::Exact(6));

        let events = remove("acme.example")
            .prepare(&history(with_domain(false)))
            .await
            .unwrap();
        assert!(events[0].unique_constraints().is_empty());

        let err = remove("other.example")
            .prepare(&history(with_domain(true)))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn domain_model_ignores_other_domains() {
        let model = load(
            &history(with_domain(true)),
            OrgDomainWriteModel::new(INSTANCE, "org-1", "acme.example"),
        )
        .await
        .unwrap();
        assert_eq!(model.state, AggregateState::Active);
        assert!(model.verified);
        assert!(!model.primary);
        // sequences of the whole org stream, not of this domain
        assert_eq!(model.base().processed_sequence, 6);
    }

    #[tokio::test]
    async fn primary_and_removal_are_guarded_by_later_org_changes() {
        // the domain model never reads a rename, the org version still moves
        let mut h = with_domain(true);
        h.push((
            org_agg("org-1"),
            IamEvent::OrgChanged(OrgChanged {
                name: "Acme Corp".into(),
                old_name: "Acme".into(),
            }),
        ));
        let reads = history(h);

        let primary = SetPrimaryOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: "acme.example".into(),
        };
        let events = primary.prepare(&reads).await.unwrap();
        assert_eq!(events[0].expected(), ExpectedVersion::Exact(7));

        let remove = RemoveOrgDomain {
            authz: admin(),
            instance_id: INSTANCE.into(),
            org_id: "org-1".into(),
            domain: "acme.example".into(),
        };
        let events = remove.prepare(&reads).await.unwrap();
        assert_eq!(events[0].expected(), ExpectedVersion::Exact(7));
    }
}
