use crate::domain::normalize;
use common::domain::{
    ApplicationConfig, CreateCredentialRepoInput, CredentialRepository, DeviceAttributes,
    DeviceProvisioner, DomainError, DomainResult, OutboundItem, OutboundSender, TelemetryRecord,
    UplinkMessage,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, field, info, instrument, warn, Span};

/// What processing an uplink produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    /// Known device, telemetry enqueued
    Published,
    /// Unseen device provisioned, telemetry and attributes enqueued
    Provisioned,
    /// Another uplink stored this device's credential first; telemetry
    /// enqueued with the stored token
    ProvisionRaceLost,
}

/// Turns one raw uplink into outbound items, provisioning unseen devices.
pub struct UplinkService {
    credential_repository: Arc<dyn CredentialRepository>,
    provisioner: Arc<dyn DeviceProvisioner>,
    outbound: OutboundSender,
    provisioning: DeviceLocks,
}

impl UplinkService {
    pub fn new(
        credential_repository: Arc<dyn CredentialRepository>,
        provisioner: Arc<dyn DeviceProvisioner>,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            credential_repository,
            provisioner,
            outbound,
            provisioning: DeviceLocks::default(),
        }
    }

    /// Process one uplink payload received for `application`.
    ///
    /// Concurrent first sightings of a device inside this process share a
    /// single provisioning call; the others wait for it and publish telemetry
    /// with the stored token. Across processes the credential store's
    /// uniqueness constraint decides which sighting owns the credential.
    /// Either way attributes are published once per device.
    #[instrument(
        skip_all,
        fields(application = %application.username, device_eui = field::Empty)
    )]
    pub async fn process_uplink(
        &self,
        application: &ApplicationConfig,
        payload: &[u8],
    ) -> DomainResult<UplinkOutcome> {
        let uplink = UplinkMessage::from_slice(payload)?;
        let device_eui = uplink.dev_eui().to_string();
        Span::current().record("device_eui", device_eui.as_str());

        let telemetry = normalize(&uplink);

        if let Some(credential) = self
            .credential_repository
            .get_credential(&device_eui)
            .await?
        {
            self.enqueue_telemetry(device_eui, credential.access_token, telemetry)?;
            debug!("enqueued telemetry for known device");
            return Ok(UplinkOutcome::Published);
        }

        let device_lock = self.provisioning.acquire(&device_eui).await;
        let outcome = {
            let _provisioning = device_lock.lock().await;
            self.provision_device(application, &uplink, device_eui.clone(), telemetry)
                .await
        };
        self.provisioning.release(&device_eui, device_lock).await;

        outcome
    }

    /// Provision an unseen device while holding its provisioning lock
    async fn provision_device(
        &self,
        application: &ApplicationConfig,
        uplink: &UplinkMessage,
        device_eui: String,
        telemetry: TelemetryRecord,
    ) -> DomainResult<UplinkOutcome> {
        // Another uplink may have provisioned the device while this one waited
        if let Some(credential) = self
            .credential_repository
            .get_credential(&device_eui)
            .await?
        {
            debug!("device provisioned by a concurrent uplink, using stored credential");
            self.enqueue_telemetry(device_eui, credential.access_token, telemetry)?;
            return Ok(UplinkOutcome::ProvisionRaceLost);
        }

        info!("unseen device, provisioning");
        let access_token = match self.provisioner.provision(&device_eui, application).await {
            Ok(access_token) => access_token,
            Err(e) => {
                // A bridge sharing this store may have won the provisioning call
                if let Some(credential) = self
                    .credential_repository
                    .get_credential(&device_eui)
                    .await?
                {
                    warn!(
                        error = %e,
                        "provisioning failed but a credential is now stored, using it"
                    );
                    self.enqueue_telemetry(device_eui, credential.access_token, telemetry)?;
                    return Ok(UplinkOutcome::ProvisionRaceLost);
                }
                return Err(e);
            }
        };

        let input = CreateCredentialRepoInput {
            device_eui: device_eui.clone(),
            access_token,
        };
        match self.credential_repository.create_credential(input).await {
            Ok(credential) => {
                self.enqueue_telemetry(
                    device_eui.clone(),
                    credential.access_token.clone(),
                    telemetry,
                )?;
                self.outbound.enqueue(OutboundItem::Attributes {
                    device_eui,
                    access_token: credential.access_token,
                    attributes: DeviceAttributes {
                        device_id: uplink.end_device_ids.device_id.clone(),
                        application_id: uplink
                            .end_device_ids
                            .application_ids
                            .application_id
                            .clone(),
                    },
                })?;
                info!("device provisioned");
                Ok(UplinkOutcome::Provisioned)
            }
            Err(DomainError::CredentialAlreadyExists(_)) => {
                let credential = self
                    .credential_repository
                    .get_credential(&device_eui)
                    .await?
                    .ok_or_else(|| DomainError::CredentialNotFound(device_eui.clone()))?;

                warn!("device was provisioned concurrently, using stored credential");
                self.enqueue_telemetry(device_eui, credential.access_token, telemetry)?;
                Ok(UplinkOutcome::ProvisionRaceLost)
            }
            Err(e) => Err(e),
        }
    }

    fn enqueue_telemetry(
        &self,
        device_eui: String,
        access_token: String,
        telemetry: TelemetryRecord,
    ) -> DomainResult<()> {
        self.outbound.enqueue(OutboundItem::Telemetry {
            device_eui,
            access_token,
            telemetry,
        })
    }
}

/// One provisioning lock per device currently being provisioned
#[derive(Default)]
struct DeviceLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    async fn acquire(&self, device_eui: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(device_eui.to_string()).or_default())
    }

    /// Drop the device's entry once no other uplink holds it
    async fn release(&self, device_eui: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map plus the one being released
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(device_eui);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
