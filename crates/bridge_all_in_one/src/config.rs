use common::domain::{ApplicationConfig, DomainError, DEFAULT_UPLINK_TOPIC};
use common::postgres::PostgresConfig;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uplink_bridge::domain::{ReconnectStrategyKind, UplinkBridgeConfig};

/// Environment variable holding the path of the YAML configuration file
pub const CONFIG_FILE_ENV: &str = "TTS_BRIDGE_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";
const ENV_PREFIX: &str = "TTS_BRIDGE";

#[derive(Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OpenTelemetry configuration
    #[serde(default)]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // ThingsBoard configuration
    /// ThingsBoard base URL
    #[serde(default)]
    pub tb_url: String,

    /// Timeout for every ThingsBoard HTTP call in seconds
    #[serde(default = "default_tb_http_timeout_secs")]
    pub tb_http_timeout_secs: u64,

    // PostgreSQL configuration (credential store)
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // TTS configuration
    /// Broker used by applications without `tts_mqtt_broker`
    #[serde(default)]
    pub tts_default_mqtt_broker: Option<String>,

    #[serde(default = "default_tts_mqtt_port")]
    pub tts_default_mqtt_port: u16,

    /// Seconds between reconnect attempts (initial delay for exponential)
    #[serde(default = "default_tts_reconnect_interval")]
    pub tts_reconnect_interval: u64,

    #[serde(default)]
    pub tts_reconnect_strategy: ReconnectStrategyKind,

    #[serde(default = "default_tts_reconnect_max_interval")]
    pub tts_reconnect_max_interval: u64,

    #[serde(default)]
    pub tts_applications: Vec<TtsApplicationConfig>,

    // Processing limits
    #[serde(default = "default_max_in_flight_uplinks")]
    pub max_in_flight_uplinks: usize,

    /// Grace period for processes and in-flight uplinks on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// One TTS application as written in the configuration file
#[derive(Deserialize, Serialize, Clone)]
pub struct TtsApplicationConfig {
    pub tts_username: String,
    pub tts_apikey: String,

    #[serde(default)]
    pub tts_mqtt_broker: Option<String>,

    #[serde(default)]
    pub tts_mqtt_port: Option<u16>,

    #[serde(default = "default_tts_topic")]
    pub tts_topic: String,

    #[serde(default = "default_tts_tls")]
    pub tts_tls: bool,

    pub tb_provision_device_key: String,
    pub tb_provision_device_secret: String,
}

const REDACTED: &str = "<redacted>";

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("otel_enabled", &self.otel_enabled)
            .field("otel_endpoint", &self.otel_endpoint)
            .field("otel_service_name", &self.otel_service_name)
            .field("tb_url", &self.tb_url)
            .field("tb_http_timeout_secs", &self.tb_http_timeout_secs)
            .field("postgres_host", &self.postgres_host)
            .field("postgres_port", &self.postgres_port)
            .field("postgres_database", &self.postgres_database)
            .field("postgres_username", &self.postgres_username)
            .field("postgres_password", &REDACTED)
            .field("postgres_max_pool_size", &self.postgres_max_pool_size)
            .field("tts_default_mqtt_broker", &self.tts_default_mqtt_broker)
            .field("tts_default_mqtt_port", &self.tts_default_mqtt_port)
            .field("tts_reconnect_interval", &self.tts_reconnect_interval)
            .field("tts_reconnect_strategy", &self.tts_reconnect_strategy)
            .field("tts_reconnect_max_interval", &self.tts_reconnect_max_interval)
            .field("tts_applications", &self.tts_applications)
            .field("max_in_flight_uplinks", &self.max_in_flight_uplinks)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for TtsApplicationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsApplicationConfig")
            .field("tts_username", &self.tts_username)
            .field("tts_apikey", &REDACTED)
            .field("tts_mqtt_broker", &self.tts_mqtt_broker)
            .field("tts_mqtt_port", &self.tts_mqtt_port)
            .field("tts_topic", &self.tts_topic)
            .field("tts_tls", &self.tts_tls)
            .field("tb_provision_device_key", &self.tb_provision_device_key)
            .field("tb_provision_device_secret", &REDACTED)
            .finish()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "tts-thingsboard-bridge".to_string()
}

fn default_tb_http_timeout_secs() -> u64 {
    30
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "tts_bridge".to_string()
}

fn default_postgres_username() -> String {
    "tts_bridge".to_string()
}

fn default_postgres_password() -> String {
    "tts_bridge".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

// TTS defaults
fn default_tts_mqtt_port() -> u16 {
    8883
}

fn default_tts_reconnect_interval() -> u64 {
    10
}

fn default_tts_reconnect_max_interval() -> u64 {
    300
}

fn default_tts_topic() -> String {
    DEFAULT_UPLINK_TOPIC.to_string()
}

fn default_tts_tls() -> bool {
    true
}

fn default_max_in_flight_uplinks() -> usize {
    64
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    /// Load the YAML file named by `TTS_BRIDGE_CONFIG_FILE` (default
    /// `config.yaml`, optional), overridden by `TTS_BRIDGE__<KEY>` variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        Config::builder()
            .add_source(File::new(&path, FileFormat::Yaml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Check settings that have no usable default
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.tb_url.trim().is_empty() {
            return Err(DomainError::InvalidConfig("tb_url is required".to_string()));
        }
        if self.tts_applications.is_empty() {
            return Err(DomainError::InvalidConfig(
                "at least one entry in tts_applications is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-application settings with broker defaults applied
    pub fn applications(&self) -> Result<Vec<ApplicationConfig>, DomainError> {
        self.tts_applications
            .iter()
            .map(|app| {
                let broker_host = app
                    .tts_mqtt_broker
                    .as_deref()
                    .or(self.tts_default_mqtt_broker.as_deref())
                    .filter(|host| !host.trim().is_empty())
                    .ok_or_else(|| {
                        DomainError::InvalidConfig(format!(
                            "application {} has no tts_mqtt_broker and tts_default_mqtt_broker is not set",
                            app.tts_username
                        ))
                    })?;

                Ok(ApplicationConfig {
                    username: app.tts_username.clone(),
                    api_key: app.tts_apikey.clone(),
                    broker_host: broker_host.to_string(),
                    broker_port: app.tts_mqtt_port.unwrap_or(self.tts_default_mqtt_port),
                    topic: app.tts_topic.clone(),
                    use_tls: app.tts_tls,
                    provision_device_key: app.tb_provision_device_key.clone(),
                    provision_device_secret: app.tb_provision_device_secret.clone(),
                })
            })
            .collect()
    }

    pub fn bridge_config(&self) -> UplinkBridgeConfig {
        UplinkBridgeConfig {
            tb_url: self.tb_url.clone(),
            http_timeout_secs: self.tb_http_timeout_secs,
            reconnect_strategy: self.tts_reconnect_strategy,
            reconnect_interval_secs: self.tts_reconnect_interval,
            reconnect_max_interval_secs: self.tts_reconnect_max_interval,
            max_in_flight_uplinks: self.max_in_flight_uplinks,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Grace period the runner gives every process on shutdown.
    ///
    /// Subscribers spend up to `shutdown_timeout` draining in-flight uplinks,
    /// and the delivery worker gets as long again to flush what they queued.
    pub fn runner_shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout().saturating_mul(2)
    }
}
