use tracing::instrument;

use irongate_core::{CommandResult, ObjectDetails};
use irongate_identity::{AddOrgMember, ChangeOrgMember, RemoveOrgMember};

use super::Commands;
use crate::context::Ctx;

impl Commands {
    #[instrument(skip(self, ctx, roles), fields(instance_id = %ctx.instance_id), err)]
    pub async fn add_org_member(
        &self,
        ctx: &Ctx,
        org_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> CommandResult<ObjectDetails> {
        let step = AddOrgMember {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
            roles,
        };
        self.execute(ctx, &[&step]).await
    }

    /// Replaces the member's roles.
    #[instrument(skip(self, ctx, roles), fields(instance_id = %ctx.instance_id), err)]
    pub async fn change_org_member(
        &self,
        ctx: &Ctx,
        org_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> CommandResult<ObjectDetails> {
        let step = ChangeOrgMember {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
            roles,
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn remove_org_member(&self, ctx: &Ctx, org_id: &str, user_id: &str) -> CommandResult<ObjectDetails> {
        let step = RemoveOrgMember {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }
}
