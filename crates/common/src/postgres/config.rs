use serde::{Deserialize, Serialize};

/// PostgreSQL configuration for the credential store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "tts_bridge".to_string(),
            username: "tts_bridge".to_string(),
            password: "tts_bridge".to_string(),
            max_pool_size: 10,
        }
    }
}
