use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Flat telemetry mapping published to the downstream platform
pub type TelemetryRecord = serde_json::Map<String, serde_json::Value>;

/// Device attributes published once, right after provisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub device_id: String,
    pub application_id: String,
}

/// Unit of work for the delivery worker
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundItem {
    Telemetry {
        device_eui: String,
        access_token: String,
        telemetry: TelemetryRecord,
    },
    Attributes {
        device_eui: String,
        access_token: String,
        attributes: DeviceAttributes,
    },
}

impl OutboundItem {
    pub fn device_eui(&self) -> &str {
        match self {
            OutboundItem::Telemetry { device_eui, .. } => device_eui,
            OutboundItem::Attributes { device_eui, .. } => device_eui,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundItem::Telemetry { .. } => "telemetry",
            OutboundItem::Attributes { .. } => "attributes",
        }
    }
}

/// Trait for publishing device data to the downstream platform
///
/// Implementations should:
/// - POST the body to the device-token scoped endpoint
/// - Return `DeliveryFailed` on transport errors and non-success statuses
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DownstreamPublisher: Send + Sync {
    async fn publish_telemetry(
        &self,
        access_token: &str,
        telemetry: &TelemetryRecord,
    ) -> DomainResult<()>;

    async fn publish_attributes(
        &self,
        access_token: &str,
        attributes: &DeviceAttributes,
    ) -> DomainResult<()>;
}

/// Producer side of the unbounded, insertion-ordered outbound queue.
///
/// Cloned into every dispatch unit; the single receiver belongs to the
/// delivery worker.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<OutboundItem>,
}

pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundItem>;

/// Create the outbound queue
pub fn outbound_queue() -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundSender { tx }, rx)
}

impl OutboundSender {
    pub fn enqueue(&self, item: OutboundItem) -> DomainResult<()> {
        self.tx
            .send(item)
            .map_err(|_| DomainError::OutboundQueueClosed)
    }
}
