mod config;

use bridge_runner::Runner;
use common::domain::CredentialRepository;
use common::postgres::{initialize_credential_schema, PostgresClient, PostgresCredentialRepository};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use crate::config::ServiceConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uplink_bridge::uplink_bridge::UplinkBridge;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize telemetry (tracing + OpenTelemetry for traces and logs)
    let telemetry_providers: Option<TelemetryProviders> =
        match init_telemetry(&config.telemetry_config()) {
            Ok(providers) => providers,
            Err(e) => {
                eprintln!("Failed to initialize telemetry: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        otel_enabled = config.otel_enabled,
        applications = config.tts_applications.len(),
        "Starting tts-thingsboard-bridge"
    );
    debug!("Configuration: {:?}", config);

    let bridge = match initialize_bridge(&config).await {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("Failed to initialize bridge: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new().with_shutdown_timeout(config.runner_shutdown_timeout());
    for (name, process) in bridge.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner = runner
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            // Flush pending traces and logs
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await;
}

async fn initialize_bridge(config: &ServiceConfig) -> anyhow::Result<UplinkBridge> {
    config.validate()?;
    let applications = config.applications()?;

    info!("Initializing PostgreSQL...");
    let postgres_client = PostgresClient::from_config(&config.postgres_config())?;
    postgres_client.ping().await?;
    initialize_credential_schema(&postgres_client).await?;

    let credential_repository: Arc<dyn CredentialRepository> =
        Arc::new(PostgresCredentialRepository::new(postgres_client));

    UplinkBridge::new(applications, credential_repository, &config.bridge_config())
}
