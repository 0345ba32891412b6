use crate::domain::{DeliveryWorker, UplinkBridgeConfig, UplinkService};
use crate::mqtt::UplinkSubscriber;
use crate::thingsboard::{build_http_client, ThingsBoardProvisioningClient, ThingsBoardPublisher};
use bridge_runner::{AppProcess, ProcessFuture};
use common::domain::{
    outbound_queue, ApplicationConfig, CredentialRepository, DeviceProvisioner,
    DownstreamPublisher,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// The bridge assembled into runner processes: one subscriber per TTS
/// application plus the single delivery worker they all feed.
pub struct UplinkBridge {
    subscribers: Vec<UplinkSubscriber>,
    delivery_worker: DeliveryWorker,
}

impl UplinkBridge {
    /// Wire the bridge against ThingsBoard over HTTP
    pub fn new(
        applications: Vec<ApplicationConfig>,
        credential_repository: Arc<dyn CredentialRepository>,
        config: &UplinkBridgeConfig,
    ) -> anyhow::Result<Self> {
        let http_client = build_http_client(config.http_timeout())?;
        let provisioner = Arc::new(ThingsBoardProvisioningClient::new(
            http_client.clone(),
            &config.tb_url,
        ));
        let publisher = Arc::new(ThingsBoardPublisher::new(http_client, &config.tb_url));

        Ok(Self::with_clients(
            applications,
            credential_repository,
            provisioner,
            publisher,
            config,
        ))
    }

    pub fn with_clients(
        applications: Vec<ApplicationConfig>,
        credential_repository: Arc<dyn CredentialRepository>,
        provisioner: Arc<dyn DeviceProvisioner>,
        publisher: Arc<dyn DownstreamPublisher>,
        config: &UplinkBridgeConfig,
    ) -> Self {
        debug!(applications = applications.len(), "initializing uplink bridge");

        let (outbound, receiver) = outbound_queue();
        let uplink_service = Arc::new(UplinkService::new(
            credential_repository,
            provisioner,
            outbound,
        ));
        let dispatch_permits = Arc::new(Semaphore::new(config.max_in_flight_uplinks.max(1)));

        let subscribers = applications
            .into_iter()
            .map(|application| {
                UplinkSubscriber::new(
                    Arc::new(application),
                    Arc::clone(&uplink_service),
                    config.reconnect(),
                    Arc::clone(&dispatch_permits),
                    config.shutdown_timeout(),
                )
            })
            .collect();

        Self {
            subscribers,
            delivery_worker: DeliveryWorker::new(receiver, publisher),
        }
    }

    /// Named processes for the runner, subscribers first
    pub fn into_runner_processes(self) -> Vec<(String, AppProcess)> {
        let mut processes: Vec<(String, AppProcess)> = self
            .subscribers
            .into_iter()
            .map(|subscriber| {
                let name = format!("tts_subscriber_{}", subscriber.application().username);
                let process: AppProcess =
                    Box::new(move |ctx| -> ProcessFuture { Box::pin(subscriber.run(ctx)) });
                (name, process)
            })
            .collect();

        let delivery_worker = self.delivery_worker;
        let process: AppProcess =
            Box::new(move |ctx| -> ProcessFuture { Box::pin(delivery_worker.run(ctx)) });
        processes.push(("delivery_worker".to_string(), process));

        processes
    }
}
