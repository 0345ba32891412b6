mod http_publisher;
mod provisioning_client;

pub use http_publisher::ThingsBoardPublisher;
pub use provisioning_client::ThingsBoardProvisioningClient;

use std::time::Duration;

/// HTTP client shared by provisioning and delivery
pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tts-thingsboard-bridge/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
