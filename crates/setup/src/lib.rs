//! Bootstraps a first instance: generated domain, first org (the default org)
//! and optionally an admin owning it.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;

use irongate_core::UuidV7Generator;
use irongate_identity::Authz;
use irongate_infra::{
    Commands, Ctx, EngineConfig, EventStore, InMemoryEventStore, InstanceSetup, PostgresEventStore, SetupAdmin,
    SetupInstance,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupConfig {
    pub instance_name: String,
    pub instance_domain: String,
    pub org_name: String,
    pub admin: Option<SetupAdmin>,
}

impl SetupConfig {
    /// Reads `IRONGATE_INSTANCE_NAME`, `IRONGATE_INSTANCE_DOMAIN`, `IRONGATE_ORG_NAME`
    /// and, when `IRONGATE_ADMIN_USERNAME` is set, the `IRONGATE_ADMIN_*` fields.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| -> anyhow::Result<String> {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => bail!("{key} must be set"),
            }
        };

        let admin = match lookup("IRONGATE_ADMIN_USERNAME") {
            Some(username) if !username.trim().is_empty() => Some(SetupAdmin {
                username,
                first_name: lookup("IRONGATE_ADMIN_FIRST_NAME").unwrap_or_else(|| "Admin".into()),
                last_name: lookup("IRONGATE_ADMIN_LAST_NAME").unwrap_or_else(|| "Admin".into()),
                email: required("IRONGATE_ADMIN_EMAIL")?,
            }),
            _ => None,
        };

        Ok(Self {
            instance_name: required("IRONGATE_INSTANCE_NAME")?,
            instance_domain: required("IRONGATE_INSTANCE_DOMAIN")?,
            org_name: lookup("IRONGATE_ORG_NAME").unwrap_or_else(|| "Default".into()),
            admin,
        })
    }
}

/// Picks the store from `engine`, then runs the setup command as the system actor.
pub async fn run(engine: &EngineConfig, setup: SetupConfig) -> anyhow::Result<InstanceSetup> {
    let store: Arc<dyn EventStore> = match &engine.database_url {
        Some(url) => Arc::new(
            PostgresEventStore::connect(url, engine.db_max_connections)
                .await
                .context("connecting to the event store")?,
        ),
        None => Arc::new(InMemoryEventStore::new()),
    };

    let commands = Commands::new(store, Arc::new(UuidV7Generator))
        .with_domain_policy(engine.domain_policy)
        .with_retry(engine.retry);
    // the instance id is generated by the command
    let ctx = Ctx::new("", setup.instance_domain.clone(), Authz::system()).with_timeout(engine.command_timeout);

    info!(instance = %setup.instance_name, domain = %setup.instance_domain, "setting up instance");
    let done = commands
        .setup_instance(
            &ctx,
            SetupInstance {
                instance_name: setup.instance_name,
                generated_domain: setup.instance_domain,
                org_name: setup.org_name,
                admin: setup.admin,
            },
        )
        .await
        .context("setting up the instance")?;
    Ok(done)
}
