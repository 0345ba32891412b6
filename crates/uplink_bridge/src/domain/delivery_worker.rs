use common::domain::{DownstreamPublisher, OutboundItem, OutboundReceiver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Single consumer of the outbound queue.
///
/// Items are delivered one at a time in enqueue order. A failed item is
/// logged and dropped; it never stops the worker. On cancellation the worker
/// keeps delivering until every producer has dropped its sender, so items
/// queued by uplinks still draining at shutdown are not lost.
pub struct DeliveryWorker {
    receiver: OutboundReceiver,
    publisher: Arc<dyn DownstreamPublisher>,
}

impl DeliveryWorker {
    pub fn new(receiver: OutboundReceiver, publisher: Arc<dyn DownstreamPublisher>) -> Self {
        Self {
            receiver,
            publisher,
        }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!("starting delivery worker");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("delivery worker cancelled, flushing outbound queue");
                    self.flush().await;
                    break;
                }
                item = self.receiver.recv() => {
                    let Some(item) = item else {
                        info!("outbound queue closed");
                        break;
                    };
                    self.deliver(item).await;
                }
            }
        }

        info!("delivery worker stopped");
        Ok(())
    }

    /// Deliver what is queued and what producers still enqueue until the
    /// last sender is gone
    async fn flush(&mut self) {
        let mut flushed: usize = 0;
        while let Some(item) = self.receiver.recv().await {
            self.deliver(item).await;
            flushed += 1;
        }
        info!(flushed, "outbound queue flushed");
    }

    #[instrument(
        name = "deliver_outbound_item",
        skip_all,
        fields(device_eui = %item.device_eui(), kind = item.kind())
    )]
    async fn deliver(&self, item: OutboundItem) {
        let result = match &item {
            OutboundItem::Telemetry {
                access_token,
                telemetry,
                ..
            } => {
                self.publisher
                    .publish_telemetry(access_token, telemetry)
                    .await
            }
            OutboundItem::Attributes {
                access_token,
                attributes,
                ..
            } => {
                self.publisher
                    .publish_attributes(access_token, attributes)
                    .await
            }
        };

        match result {
            Ok(()) => debug!("delivered outbound item"),
            Err(e) => error!(error = %e, "failed to deliver outbound item, dropping it"),
        }
    }
}
