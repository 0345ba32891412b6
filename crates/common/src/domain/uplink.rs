use crate::domain::result::{DomainError, DomainResult};
use serde::Deserialize;

/// Uplink message published by The Things Stack on `v3/{app}/devices/{device}/up`.
///
/// Only the fields the bridge reads are modelled. Everything else in the
/// document is ignored during deserialization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UplinkMessage {
    pub end_device_ids: EndDeviceIds,
    pub uplink_message: UplinkFrame,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndDeviceIds {
    pub device_id: String,
    pub dev_eui: String,
    pub application_ids: ApplicationIds,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplicationIds {
    pub application_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UplinkFrame {
    #[serde(default)]
    pub f_port: Option<u32>,
    pub f_cnt: u32,
    #[serde(default)]
    pub frm_payload: Option<String>,
    /// Output of the application's payload formatter. Usually an object, but
    /// a formatter may emit any JSON value.
    #[serde(default)]
    pub decoded_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub normalized_payload: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    pub rx_metadata: Vec<RxMetadata>,
    pub settings: TxSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RxMetadata {
    pub rssi: serde_json::Number,
    pub snr: serde_json::Number,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TxSettings {
    pub data_rate: DataRate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataRate {
    pub lora: LoraDataRate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoraDataRate {
    pub spreading_factor: u32,
}

impl UplinkMessage {
    /// Parse a raw MQTT payload into an uplink message.
    ///
    /// Fails with `MalformedUplink` when the body is not UTF-8 JSON, when a
    /// mandatory field is missing, or when no gateway metadata is present.
    pub fn from_slice(payload: &[u8]) -> DomainResult<Self> {
        let uplink: UplinkMessage = serde_json::from_slice(payload)
            .map_err(|e| DomainError::MalformedUplink(e.to_string()))?;

        if uplink.uplink_message.rx_metadata.is_empty() {
            return Err(DomainError::MalformedUplink(format!(
                "uplink from device {} has no rx_metadata",
                uplink.end_device_ids.dev_eui
            )));
        }

        Ok(uplink)
    }

    pub fn dev_eui(&self) -> &str {
        &self.end_device_ids.dev_eui
    }
}
