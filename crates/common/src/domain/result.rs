use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed uplink: {0}")]
    MalformedUplink(String),

    #[error("Device credential already exists: {0}")]
    CredentialAlreadyExists(String),

    #[error("Device credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Provisioning rejected for device {device_eui}: {message}")]
    ProvisionRejected { device_eui: String, message: String },

    #[error("Provisioning failed for device {device_eui}: {message}")]
    ProvisioningFailed { device_eui: String, message: String },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Outbound queue closed")]
    OutboundQueueClosed,

    #[error("MQTT error: {0}")]
    MqttError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
