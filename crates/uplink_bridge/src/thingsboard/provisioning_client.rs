use async_trait::async_trait;
use common::domain::{ApplicationConfig, DeviceProvisioner, DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const PROVISION_SUCCESS: &str = "SUCCESS";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionRequest<'a> {
    device_name: &'a str,
    provision_device_key: &'a str,
    provision_device_secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionResponse {
    status: String,
    #[serde(default)]
    credentials_value: Option<String>,
    #[serde(default)]
    error_msg: Option<String>,
}

/// Device provisioning against the ThingsBoard `/api/v1/provision` endpoint.
///
/// The device is registered under its EUI as name. ThingsBoard reports the
/// outcome in the response body, so the body is parsed whatever the HTTP
/// status.
#[derive(Clone)]
pub struct ThingsBoardProvisioningClient {
    client: reqwest::Client,
    base_url: String,
}

impl ThingsBoardProvisioningClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: super::base_url(base_url),
        }
    }
}

#[async_trait]
impl DeviceProvisioner for ThingsBoardProvisioningClient {
    #[instrument(
        name = "provision_device",
        skip(self, application),
        fields(application = %application.username)
    )]
    async fn provision(
        &self,
        device_eui: &str,
        application: &ApplicationConfig,
    ) -> DomainResult<String> {
        let failed = |message: String| DomainError::ProvisioningFailed {
            device_eui: device_eui.to_string(),
            message,
        };

        let request = ProvisionRequest {
            device_name: device_eui,
            provision_device_key: &application.provision_device_key,
            provision_device_secret: &application.provision_device_secret,
        };

        let response = self
            .client
            .post(format!("{}/api/v1/provision", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let http_status = response.status();
        let body: ProvisionResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("invalid response (HTTP {}): {}", http_status, e)))?;

        if body.status != PROVISION_SUCCESS {
            let message = body
                .error_msg
                .unwrap_or_else(|| format!("provisioning status {}", body.status));
            warn!(status = %body.status, error = %message, "provisioning rejected");
            return Err(DomainError::ProvisionRejected {
                device_eui: device_eui.to_string(),
                message,
            });
        }

        match body.credentials_value {
            Some(token) if !token.is_empty() => {
                debug!("provisioning succeeded");
                Ok(token)
            }
            _ => Err(failed("success response without credentialsValue".to_string())),
        }
    }
}
