mod options;
mod subscriber;

pub use options::mqtt_options;
pub use subscriber::UplinkSubscriber;
