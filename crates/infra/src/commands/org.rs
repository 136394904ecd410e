use tracing::instrument;

use irongate_core::{CommandResult, ObjectDetails};
use irongate_events::Preparation;
use irongate_identity::{
    AddOrg, AddOrgDomain, AddOrgMember, ChangeOrg, DeactivateOrg, IamEvent, ReactivateOrg, RemoveOrg,
    RemoveOrgDomain, SetPrimaryOrgDomain, VerifyOrgDomain,
};

use super::{Commands, Created};
use crate::context::Ctx;

/// An existing user made member of a new org.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgAdmin {
    pub user_id: String,
    /// Defaults to `ORG_OWNER` when empty.
    pub roles: Vec<String>,
}

impl Commands {
    /// Adds an org with its default domain and the given admins, atomically.
    #[instrument(skip(self, ctx, admins), fields(instance_id = %ctx.instance_id, admins = admins.len()), err)]
    pub async fn add_org(&self, ctx: &Ctx, name: &str, admins: Vec<OrgAdmin>) -> CommandResult<Created> {
        let org_id = self.next_id()?;
        let add_org = AddOrg {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            instance_domain: ctx.requested_domain.clone(),
            org_id: org_id.clone(),
            name: name.to_string(),
        };
        let add_members: Vec<AddOrgMember> = admins
            .into_iter()
            .map(|admin| AddOrgMember {
                authz: ctx.authz.clone(),
                instance_id: ctx.instance_id.clone(),
                org_id: org_id.clone(),
                user_id: admin.user_id,
                roles: if admin.roles.is_empty() {
                    vec!["ORG_OWNER".into()]
                } else {
                    admin.roles
                },
            })
            .collect();

        let mut steps: Vec<&dyn Preparation<IamEvent>> = vec![&add_org];
        steps.extend(add_members.iter().map(|m| m as &dyn Preparation<IamEvent>));

        let details = self.execute(ctx, &steps).await?;
        Ok(Created { id: org_id, details })
    }

    /// Renames an org; its default domain follows the new name.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn change_org(&self, ctx: &Ctx, org_id: &str, name: &str) -> CommandResult<ObjectDetails> {
        let step = ChangeOrg {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            instance_domain: ctx.requested_domain.clone(),
            org_id: org_id.to_string(),
            name: name.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn deactivate_org(&self, ctx: &Ctx, org_id: &str) -> CommandResult<ObjectDetails> {
        let step = DeactivateOrg {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn reactivate_org(&self, ctx: &Ctx, org_id: &str) -> CommandResult<ObjectDetails> {
        let step = ReactivateOrg {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    /// Removes an org and releases its name, verified domains and usernames.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn remove_org(&self, ctx: &Ctx, org_id: &str) -> CommandResult<ObjectDetails> {
        let step = RemoveOrg {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn add_org_domain(&self, ctx: &Ctx, org_id: &str, domain: &str) -> CommandResult<ObjectDetails> {
        let step = AddOrgDomain {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            domain: domain.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn verify_org_domain(&self, ctx: &Ctx, org_id: &str, domain: &str) -> CommandResult<ObjectDetails> {
        let step = VerifyOrgDomain {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            domain: domain.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn set_primary_org_domain(
        &self,
        ctx: &Ctx,
        org_id: &str,
        domain: &str,
    ) -> CommandResult<ObjectDetails> {
        let step = SetPrimaryOrgDomain {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            domain: domain.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn remove_org_domain(&self, ctx: &Ctx, org_id: &str, domain: &str) -> CommandResult<ObjectDetails> {
        let step = RemoveOrgDomain {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            domain: domain.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }
}
