use membership_payments::{config::Config, services::init_metrics, Application};
use service_core::error::set_expose_details;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    set_expose_details(!config.environment.is_production());
    init_metrics()?;

    tracing::info!(
        environment = ?config.environment,
        port = config.common.port,
        "Starting membership-payments"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
