use access_service::{config::AccessConfig, services::metrics, Application};
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.otlp_endpoint.as_deref(),
    );
    metrics::init_metrics()?;

    tracing::info!(
        environment = ?config.common.environment,
        "Starting {}",
        config.service_name
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
