use serde::{Deserialize, Serialize};

/// Default TTS topic: every uplink of every device in the application.
pub const DEFAULT_UPLINK_TOPIC: &str = "v3/+/devices/+/up";

/// Resolved settings for one upstream TTS application.
///
/// Built once at startup from the service configuration, with broker defaults
/// already applied, and shared read-only between the subscriber and the
/// provisioning client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// TTS application username, also used as the application identity in logs
    pub username: String,
    /// TTS API key used as the MQTT password
    pub api_key: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub use_tls: bool,
    pub provision_device_key: String,
    pub provision_device_secret: String,
}

impl ApplicationConfig {
    /// MQTT client identifier for this application's subscription
    pub fn client_id(&self) -> String {
        format!("tts-bridge-{}", self.username)
    }
}
