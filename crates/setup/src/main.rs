#[tokio::main]
async fn main() -> anyhow::Result<()> {
    irongate_observability::tracing::init(&irongate_observability::tracing::LogConfig::from_env());

    let engine = irongate_infra::EngineConfig::from_env()?;
    let setup = irongate_setup::SetupConfig::from_env()?;
    let done = irongate_setup::run(&engine, setup).await?;

    tracing::info!(
        instance_id = %done.instance_id,
        org_id = %done.org_id,
        admin_user_id = ?done.admin_user_id,
        sequence = done.details.sequence,
        "first instance ready"
    );
    Ok(())
}
