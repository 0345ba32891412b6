use crate::domain::{
    CreateCredentialRepoInput, CredentialRepository, DeviceCredential, DomainError, DomainResult,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

// PostgreSQL SQLSTATE codes
const UNIQUE_VIOLATION: &str = "23505";
const DUPLICATE_TABLE: &str = "42P07";

const CREATE_CREDENTIALS_TABLE: &str = "CREATE TABLE device_credentials (
    device_eui VARCHAR(16) NOT NULL,
    access_token VARCHAR(255) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)";

const CREATE_CREDENTIALS_INDEX: &str =
    "CREATE UNIQUE INDEX idx_device_credentials_device_eui ON device_credentials (device_eui)";

/// Credential row for PostgreSQL storage
#[derive(Debug, Clone)]
pub struct DeviceCredentialRow {
    pub device_eui: String,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
}

impl From<DeviceCredentialRow> for DeviceCredential {
    fn from(row: DeviceCredentialRow) -> Self {
        DeviceCredential {
            device_eui: row.device_eui,
            access_token: row.access_token,
            created_at: row.created_at,
        }
    }
}

/// Create the credential table and its unique index.
///
/// Safe to call on every startup: an already existing table or index is not
/// an error.
pub async fn initialize_credential_schema(client: &PostgresClient) -> anyhow::Result<()> {
    let conn = client.get_connection().await?;

    for statement in [CREATE_CREDENTIALS_TABLE, CREATE_CREDENTIALS_INDEX] {
        match conn.execute(statement, &[]).await {
            Ok(_) => {}
            Err(e) if sql_state(&e) == Some(DUPLICATE_TABLE) => {
                debug!("credential schema object already exists");
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("credential schema ready");
    Ok(())
}

fn sql_state(error: &tokio_postgres::Error) -> Option<&str> {
    error.as_db_error().map(|db_err| db_err.code().code())
}

/// PostgreSQL implementation of CredentialRepository trait
#[derive(Clone)]
pub struct PostgresCredentialRepository {
    client: PostgresClient,
}

impl PostgresCredentialRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    #[instrument(skip(self), fields(device_eui = %device_eui))]
    async fn get_credential(&self, device_eui: &str) -> DomainResult<Option<DeviceCredential>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT device_eui, access_token, created_at
                 FROM device_credentials
                 WHERE device_eui = $1",
                &[&device_eui],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.map(|row| {
            DeviceCredentialRow {
                device_eui: row.get(0),
                access_token: row.get(1),
                created_at: row.get(2),
            }
            .into()
        }))
    }

    #[instrument(skip(self, input), fields(device_eui = %input.device_eui))]
    async fn create_credential(
        &self,
        input: CreateCredentialRepoInput,
    ) -> DomainResult<DeviceCredential> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let now = Utc::now();

        let result = conn
            .execute(
                "INSERT INTO device_credentials (device_eui, access_token, created_at)
                 VALUES ($1, $2, $3)",
                &[&input.device_eui, &input.access_token, &now],
            )
            .await;

        if let Err(e) = result {
            if sql_state(&e) == Some(UNIQUE_VIOLATION) {
                return Err(DomainError::CredentialAlreadyExists(input.device_eui));
            }
            return Err(DomainError::RepositoryError(e.into()));
        }

        debug!("stored credential for device: {}", input.device_eui);

        Ok(DeviceCredential {
            device_eui: input.device_eui,
            access_token: input.access_token,
            created_at: now,
        })
    }
}
