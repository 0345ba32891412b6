mod delivery_worker;
mod reconnect_strategy;
mod telemetry_normalizer;
mod uplink_bridge_config;
mod uplink_service;

pub use delivery_worker::*;
pub use reconnect_strategy::*;
pub use telemetry_normalizer::*;
pub use uplink_bridge_config::*;
pub use uplink_service::*;
