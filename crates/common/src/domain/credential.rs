use crate::domain::application::ApplicationConfig;
use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Downstream access token bound to a single device EUI
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCredential {
    pub device_eui: String,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
}

/// Repository input for storing a freshly provisioned credential
#[derive(Debug, Clone, PartialEq)]
pub struct CreateCredentialRepoInput {
    pub device_eui: String,
    pub access_token: String,
}

/// Durable mapping from device EUI to access token.
///
/// At most one credential exists per device EUI. Implementations must enforce
/// that with the store itself (unique constraint), not with in-process locks,
/// and report a losing insert as `DomainError::CredentialAlreadyExists`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Look up the credential for a device
    async fn get_credential(&self, device_eui: &str) -> DomainResult<Option<DeviceCredential>>;

    /// Store a new credential, failing with `CredentialAlreadyExists` on conflict
    async fn create_credential(
        &self,
        input: CreateCredentialRepoInput,
    ) -> DomainResult<DeviceCredential>;
}

/// Mints a new access token for an unseen device on the downstream platform.
///
/// Not idempotent downstream: callers decide when a device needs provisioning.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceProvisioner: Send + Sync {
    /// Provision `device_eui` with the application's provisioning key/secret
    ///
    /// # Returns
    /// The access token on success, `ProvisionRejected` when the downstream
    /// platform answers with a non-success status, `ProvisioningFailed` on
    /// transport or decoding failures.
    async fn provision(&self, device_eui: &str, application: &ApplicationConfig)
        -> DomainResult<String>;
}
