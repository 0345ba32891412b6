use common::domain::ApplicationConfig;
use rumqttc::{MqttOptions, Transport};
use std::time::Duration;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

// TTS uplinks carry metadata for every receiving gateway and easily exceed
// the rumqttc default of 10 KiB
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Connection options for one TTS application's broker session
pub fn mqtt_options(application: &ApplicationConfig) -> MqttOptions {
    let mut options = MqttOptions::new(
        application.client_id(),
        application.broker_host.as_str(),
        application.broker_port,
    );
    options.set_credentials(application.username.as_str(), application.api_key.as_str());
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if application.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::DEFAULT_UPLINK_TOPIC;

    fn application(use_tls: bool) -> ApplicationConfig {
        ApplicationConfig {
            username: "weather-stations@ttn".to_string(),
            api_key: "NNSXS.TEST".to_string(),
            broker_host: "eu1.cloud.thethings.network".to_string(),
            broker_port: 8883,
            topic: DEFAULT_UPLINK_TOPIC.to_string(),
            use_tls,
            provision_device_key: "key".to_string(),
            provision_device_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_options_from_application() {
        let options = mqtt_options(&application(true));

        assert_eq!(options.client_id(), "tts-bridge-weather-stations@ttn");
        assert_eq!(
            options.broker_address(),
            ("eu1.cloud.thethings.network".to_string(), 8883)
        );
        assert_eq!(
            options.credentials(),
            Some(("weather-stations@ttn".to_string(), "NNSXS.TEST".to_string()))
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
        assert!(matches!(options.transport(), Transport::Tls(_)));
    }

    #[test]
    fn test_plain_tcp_when_tls_disabled() {
        let options = mqtt_options(&application(false));

        assert!(matches!(options.transport(), Transport::Tcp));
    }
}
