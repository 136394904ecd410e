use tracing::{info, instrument};

use irongate_core::{CommandResult, ObjectDetails};
use irongate_events::Preparation;
use irongate_identity::{
    AddHumanUser, AddInstance, AddInstanceDomain, AddOrg, AddOrgMember, IamEvent, RemoveInstance,
    RemoveInstanceDomain, SetDefaultOrg, SetPrimaryInstanceDomain,
};

use super::Commands;
use crate::context::Ctx;

/// First administrator created together with an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupAdmin {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupInstance {
    pub instance_name: String,
    /// Globally unique domain generated for the instance.
    pub generated_domain: String,
    pub org_name: String,
    pub admin: Option<SetupAdmin>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSetup {
    pub instance_id: String,
    pub org_id: String,
    pub admin_user_id: Option<String>,
    pub details: ObjectDetails,
}

impl Commands {
    /// Creates an instance with its generated domain, a first org that becomes
    /// the default org and, optionally, an admin owning that org. One push.
    #[instrument(skip(self, ctx, setup), fields(instance = %setup.instance_name), err)]
    pub async fn setup_instance(&self, ctx: &Ctx, setup: SetupInstance) -> CommandResult<InstanceSetup> {
        let instance_id = self.next_id()?;
        let org_id = self.next_id()?;
        let admin_user_id = setup.admin.as_ref().map(|_| self.next_id()).transpose()?;

        let add_instance = AddInstance {
            authz: ctx.authz.clone(),
            instance_id: instance_id.clone(),
            name: setup.instance_name.clone(),
            generated_domain: setup.generated_domain.clone(),
        };
        let add_org = AddOrg {
            authz: ctx.authz.clone(),
            instance_id: instance_id.clone(),
            instance_domain: setup.generated_domain.clone(),
            org_id: org_id.clone(),
            name: setup.org_name.clone(),
        };
        let set_default = SetDefaultOrg {
            authz: ctx.authz.clone(),
            instance_id: instance_id.clone(),
            org_id: org_id.clone(),
        };
        let admin_steps = match (&setup.admin, &admin_user_id) {
            (Some(admin), Some(user_id)) => Some((
                AddHumanUser {
                    authz: ctx.authz.clone(),
                    instance_id: instance_id.clone(),
                    org_id: org_id.clone(),
                    user_id: user_id.clone(),
                    username: admin.username.clone(),
                    first_name: admin.first_name.clone(),
                    last_name: admin.last_name.clone(),
                    email: admin.email.clone(),
                    policy: self.domain_policy,
                },
                AddOrgMember {
                    authz: ctx.authz.clone(),
                    instance_id: instance_id.clone(),
                    org_id: org_id.clone(),
                    user_id: user_id.clone(),
                    roles: vec!["ORG_OWNER".into()],
                },
            )),
            _ => None,
        };

        let mut steps: Vec<&dyn Preparation<IamEvent>> = vec![&add_instance, &add_org];
        if let Some((add_user, add_member)) = &admin_steps {
            steps.push(add_user);
            steps.push(add_member);
        }
        steps.push(&set_default);

        let details = self.execute(ctx, &steps).await?;
        info!(%instance_id, %org_id, "instance set up");
        Ok(InstanceSetup {
            instance_id,
            org_id,
            admin_user_id,
            details,
        })
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn remove_instance(&self, ctx: &Ctx) -> CommandResult<ObjectDetails> {
        let step = RemoveInstance {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn set_default_org(&self, ctx: &Ctx, org_id: &str) -> CommandResult<ObjectDetails> {
        let step = SetDefaultOrg {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn add_instance_domain(&self, ctx: &Ctx, domain: &str) -> CommandResult<ObjectDetails> {
        let step = AddInstanceDomain {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            domain: domain.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn set_primary_instance_domain(&self, ctx: &Ctx, domain: &str) -> CommandResult<ObjectDetails> {
        let step = SetPrimaryInstanceDomain {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            domain: domain.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn remove_instance_domain(&self, ctx: &Ctx, domain: &str) -> CommandResult<ObjectDetails> {
        let step = RemoveInstanceDomain {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            domain: domain.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }
}
