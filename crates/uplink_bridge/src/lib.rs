pub mod domain;
pub mod mqtt;
pub mod thingsboard;
pub mod uplink_bridge;
