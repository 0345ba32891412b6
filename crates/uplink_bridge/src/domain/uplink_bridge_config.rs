use crate::domain::{ReconnectStrategy, ReconnectStrategyKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkBridgeConfig {
    /// ThingsBoard base URL, e.g. `https://thingsboard.example.com`
    pub tb_url: String,

    /// Timeout applied to every ThingsBoard HTTP call (default: 30 seconds)
    pub http_timeout_secs: u64,

    pub reconnect_strategy: ReconnectStrategyKind,

    /// Delay before reconnecting to a broker (default: 10 seconds)
    pub reconnect_interval_secs: u64,

    /// Upper bound for exponential reconnect delays (default: 300 seconds)
    pub reconnect_max_interval_secs: u64,

    /// Uplinks processed concurrently across all subscriptions (default: 64)
    pub max_in_flight_uplinks: usize,

    /// Grace period for in-flight uplinks on shutdown (default: 10 seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for UplinkBridgeConfig {
    fn default() -> Self {
        Self {
            tb_url: "http://localhost:8080".to_string(),
            http_timeout_secs: 30,
            reconnect_strategy: ReconnectStrategyKind::Fixed,
            reconnect_interval_secs: 10,
            reconnect_max_interval_secs: 300,
            max_in_flight_uplinks: 64,
            shutdown_timeout_secs: 10,
        }
    }
}

impl UplinkBridgeConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn reconnect(&self) -> ReconnectStrategy {
        ReconnectStrategy::new(
            self.reconnect_strategy,
            Duration::from_secs(self.reconnect_interval_secs),
            Duration::from_secs(self.reconnect_max_interval_secs),
        )
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
