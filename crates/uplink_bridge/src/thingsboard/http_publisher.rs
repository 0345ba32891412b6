use async_trait::async_trait;
use common::domain::{
    DeviceAttributes, DomainError, DomainResult, DownstreamPublisher, TelemetryRecord,
};
use serde::Serialize;

/// Publishes through the ThingsBoard device HTTP API
/// (`/api/v1/{access_token}/telemetry` and `/api/v1/{access_token}/attributes`).
#[derive(Clone)]
pub struct ThingsBoardPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl ThingsBoardPublisher {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: super::base_url(base_url),
        }
    }

    // The access token is part of the URL, keep it out of error messages
    async fn post<T: Serialize + ?Sized>(
        &self,
        access_token: &str,
        endpoint: &str,
        body: &T,
    ) -> DomainResult<()> {
        let url = format!("{}/api/v1/{}/{}", self.base_url, access_token, endpoint);

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                DomainError::DeliveryFailed(format!(
                    "{} request failed: {}",
                    endpoint,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DomainError::DeliveryFailed(format!(
                "{} rejected with HTTP {}",
                endpoint, status
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl DownstreamPublisher for ThingsBoardPublisher {
    async fn publish_telemetry(
        &self,
        access_token: &str,
        telemetry: &TelemetryRecord,
    ) -> DomainResult<()> {
        self.post(access_token, "telemetry", telemetry).await
    }

    async fn publish_attributes(
        &self,
        access_token: &str,
        attributes: &DeviceAttributes,
    ) -> DomainResult<()> {
        self.post(access_token, "attributes", attributes).await
    }
}
