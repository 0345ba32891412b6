use crate::domain::credential::{CreateCredentialRepoInput, CredentialRepository, DeviceCredential};
use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of CredentialRepository using HashMap.
///
/// Check-and-insert happens under one write lock, which plays the role of the
/// unique index of the durable store.
#[derive(Clone)]
pub struct InMemoryCredentialRepository {
    credentials: Arc<RwLock<HashMap<String, DeviceCredential>>>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self {
            credentials: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn count(&self) -> usize {
        self.credentials.read().await.len()
    }
}

impl Default for InMemoryCredentialRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn get_credential(&self, device_eui: &str) -> DomainResult<Option<DeviceCredential>> {
        let credentials = self.credentials.read().await;
        Ok(credentials.get(device_eui).cloned())
    }

    async fn create_credential(
        &self,
        input: CreateCredentialRepoInput,
    ) -> DomainResult<DeviceCredential> {
        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(&input.device_eui) {
            return Err(DomainError::CredentialAlreadyExists(input.device_eui));
        }

        let credential = DeviceCredential {
            device_eui: input.device_eui.clone(),
            access_token: input.access_token,
            created_at: chrono::Utc::now(),
        };
        credentials.insert(input.device_eui, credential.clone());
        Ok(credential)
    }
}
