use tracing::instrument;

use irongate_core::{CommandResult, ObjectDetails};
use irongate_identity::{AddHumanUser, ChangeUsername, DeactivateUser, ReactivateUser, RemoveUser};

use super::{Commands, Created};
use crate::context::Ctx;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HumanUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Commands {
    #[instrument(skip(self, ctx, user), fields(instance_id = %ctx.instance_id), err)]
    pub async fn add_human_user(&self, ctx: &Ctx, org_id: &str, user: HumanUser) -> CommandResult<Created> {
        let user_id = self.next_id()?;
        let step = AddHumanUser {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: org_id.to_string(),
            user_id: user_id.clone(),
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            policy: self.domain_policy,
        };
        let details = self.execute(ctx, &[&step]).await?;
        Ok(Created { id: user_id, details })
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn change_username(&self, ctx: &Ctx, user_id: &str, username: &str) -> CommandResult<ObjectDetails> {
        let step = ChangeUsername {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            user_id: user_id.to_string(),
            username: username.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn deactivate_user(&self, ctx: &Ctx, user_id: &str) -> CommandResult<ObjectDetails> {
        let step = DeactivateUser {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            user_id: user_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn reactivate_user(&self, ctx: &Ctx, user_id: &str) -> CommandResult<ObjectDetails> {
        let step = ReactivateUser {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            user_id: user_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }

    /// Removes the user and its memberships in every org.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id), err)]
    pub async fn remove_user(&self, ctx: &Ctx, user_id: &str) -> CommandResult<ObjectDetails> {
        let step = RemoveUser {
            authz: ctx.authz.clone(),
            instance_id: ctx.instance_id.clone(),
            user_id: user_id.to_string(),
        };
        self.execute(ctx, &[&step]).await
    }
}
