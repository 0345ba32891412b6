use crate::domain::{ReconnectStrategy, UplinkOutcome, UplinkService};
use crate::mqtt::mqtt_options;
use bytes::Bytes;
use common::domain::{ApplicationConfig, DomainError, DomainResult};
use rumqttc::{AsyncClient, Event, Packet, QoS, SubscribeReasonCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

/// Long-lived MQTT subscription for one TTS application.
///
/// Reconnects without limit until cancelled. Every received uplink is handled
/// as its own task in a supervised `JoinSet`, so a slow provisioning call
/// never holds up the receive loop. A semaphore shared by all subscribers
/// bounds how many uplinks are processed at once.
pub struct UplinkSubscriber {
    application: Arc<ApplicationConfig>,
    uplink_service: Arc<UplinkService>,
    reconnect: ReconnectStrategy,
    dispatch_permits: Arc<Semaphore>,
    shutdown_timeout: Duration,
}

impl UplinkSubscriber {
    pub fn new(
        application: Arc<ApplicationConfig>,
        uplink_service: Arc<UplinkService>,
        reconnect: ReconnectStrategy,
        dispatch_permits: Arc<Semaphore>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            application,
            uplink_service,
            reconnect,
            dispatch_permits,
            shutdown_timeout,
        }
    }

    pub fn application(&self) -> &ApplicationConfig {
        &self.application
    }

    /// Run the subscription until `ctx` is cancelled
    #[instrument(
        name = "mqtt_subscriber",
        skip_all,
        fields(application = %self.application.username)
    )]
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!(
            broker = %self.application.broker_host,
            port = self.application.broker_port,
            topic = %self.application.topic,
            tls = self.application.use_tls,
            "starting MQTT subscriber"
        );

        let mut dispatch = JoinSet::new();
        let mut attempt: u32 = 0;

        loop {
            if ctx.is_cancelled() {
                debug!("MQTT subscriber cancelled before connection");
                break;
            }

            match self
                .run_mqtt_connection(&ctx, &mut dispatch, &mut attempt)
                .await
            {
                Ok(()) => {
                    debug!("MQTT subscriber stopped cleanly");
                    break;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.reconnect.delay(attempt);
                    error!(
                        error = %e,
                        attempt,
                        retry_in_secs = delay.as_secs_f64(),
                        "MQTT connection error, reconnecting"
                    );

                    if self.wait_before_reconnect(delay, &ctx, &mut dispatch).await {
                        break;
                    }
                }
            }
        }

        self.drain_dispatch(&mut dispatch).await;
        info!("MQTT subscriber stopped");
        Ok(())
    }

    /// Run a single broker session. Returns `Ok` only on cancellation.
    #[instrument(
        name = "mqtt_connection",
        skip_all,
        fields(broker = %self.application.broker_host)
    )]
    async fn run_mqtt_connection(
        &self,
        ctx: &CancellationToken,
        dispatch: &mut JoinSet<()>,
        attempt: &mut u32,
    ) -> DomainResult<()> {
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&self.application), 100);

        client
            .subscribe(&self.application.topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| DomainError::MqttError(format!("failed to subscribe: {}", e)))?;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("cancellation received, disconnecting");
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                Some(joined) = dispatch.join_next(), if !dispatch.is_empty() => {
                    log_dispatch_exit(joined);
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.dispatch_uplink(dispatch, publish.topic, publish.payload);
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            *attempt = 0;
                            info!("connected to MQTT broker");
                        }
                        Ok(Event::Incoming(Packet::SubAck(suback))) => {
                            if suback
                                .return_codes
                                .iter()
                                .any(|code| matches!(code, SubscribeReasonCode::Failure))
                            {
                                return Err(DomainError::MqttError(format!(
                                    "broker rejected subscription to {}",
                                    self.application.topic
                                )));
                            }
                            info!(topic = %self.application.topic, "subscribed to MQTT topic");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(DomainError::MqttError(format!(
                                "event loop error: {}",
                                e
                            )));
                        }
                    }
                }
            }
        }
    }

    /// Spawn the processing of one uplink under its own root span
    fn dispatch_uplink(&self, dispatch: &mut JoinSet<()>, topic: String, payload: Bytes) {
        let span = info_span!(
            parent: Span::none(),
            "mqtt_uplink",
            application = %self.application.username,
            topic = %topic,
            payload_size = payload.len(),
        );

        let application = Arc::clone(&self.application);
        let uplink_service = Arc::clone(&self.uplink_service);
        let permits = Arc::clone(&self.dispatch_permits);

        dispatch.spawn(
            async move {
                let Ok(_permit) = permits.acquire().await else {
                    warn!("dispatch limiter closed, dropping uplink");
                    return;
                };
                log_uplink_result(uplink_service.process_uplink(&application, &payload).await);
            }
            .instrument(span),
        );
    }

    /// Sleep before the next connection attempt while still reaping finished
    /// uplinks. Returns true when cancelled.
    async fn wait_before_reconnect(
        &self,
        delay: Duration,
        ctx: &CancellationToken,
        dispatch: &mut JoinSet<()>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return true,
                _ = &mut sleep => return false,
                Some(joined) = dispatch.join_next(), if !dispatch.is_empty() => {
                    log_dispatch_exit(joined);
                }
            }
        }
    }

    async fn drain_dispatch(&self, dispatch: &mut JoinSet<()>) {
        if dispatch.is_empty() {
            return;
        }

        info!(in_flight = dispatch.len(), "waiting for in-flight uplinks");
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = dispatch.join_next().await {
                log_dispatch_exit(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = dispatch.len(),
                "in-flight uplinks did not finish in time, aborting"
            );
            dispatch.shutdown().await;
        }
    }
}

fn log_uplink_result(result: DomainResult<UplinkOutcome>) {
    match result {
        Ok(outcome) => debug!(?outcome, "uplink processed"),
        Err(DomainError::MalformedUplink(reason)) => {
            warn!(reason = %reason, "malformed uplink, dropping message");
        }
        Err(e @ DomainError::ProvisionRejected { .. }) => {
            warn!(error = %e, "device provisioning rejected, dropping message");
        }
        Err(e) => error!(error = %e, "failed to process uplink, dropping message"),
    }
}

fn log_dispatch_exit(joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => debug!("uplink task aborted"),
        Err(e) => error!(error = %e, "uplink task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        outbound_queue, CreateCredentialRepoInput, CredentialRepository, DeviceCredential,
        InMemoryCredentialRepository, MockCredentialRepository, MockDeviceProvisioner, OutboundItem,
        DEFAULT_UPLINK_TOPIC,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const SUBACK_QOS1: u8 = 0x01;
    const SUBACK_FAILURE: u8 = 0x80;

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut length: usize = 0;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            length |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; length];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Broker that accepts every session, answers the subscription with
    /// `suback_code` and then hangs up. Returns its port and a session counter.
    async fn flaky_broker(suback_code: u8) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&sessions);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if read_packet(&mut stream).await.is_err() {
                        return;
                    }
                    if stream.write_all(&CONNACK_ACCEPTED).await.is_err() {
                        return;
                    }
                    let Ok((header, body)) = read_packet(&mut stream).await else {
                        return;
                    };
                    if header >> 4 == 8 && body.len() >= 2 {
                        let suback = [0x90, 0x03, body[0], body[1], suback_code];
                        let _ = stream.write_all(&suback).await;
                        let _ = stream.flush().await;
                    }
                });
            }
        });

        (port, sessions)
    }

    fn idle_service() -> Arc<UplinkService> {
        let mut repository = MockCredentialRepository::new();
        repository.expect_get_credential().times(0);
        let mut provisioner = MockDeviceProvisioner::new();
        provisioner.expect_provision().times(0);
        let (sender, _receiver) = outbound_queue();
        Arc::new(UplinkService::new(
            Arc::new(repository),
            Arc::new(provisioner),
            sender,
        ))
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn application(port: u16) -> Arc<ApplicationConfig> {
        Arc::new(ApplicationConfig {
            username: "weather-stations@ttn".to_string(),
            api_key: "NNSXS.TEST".to_string(),
            broker_host: "127.0.0.1".to_string(),
            broker_port: port,
            topic: DEFAULT_UPLINK_TOPIC.to_string(),
            use_tls: false,
            provision_device_key: "key".to_string(),
            provision_device_secret: "secret".to_string(),
        })
    }

    fn uplink_payload(dev_eui: &str) -> Bytes {
        let document = serde_json::json!({
            "end_device_ids": {
                "device_id": format!("eui-{}", dev_eui),
                "dev_eui": dev_eui,
                "application_ids": { "application_id": "weather-stations" }
            },
            "uplink_message": {
                "f_cnt": 1,
                "decoded_payload": { "battery": 3.6 },
                "rx_metadata": [{ "rssi": -80, "snr": 7 }],
                "settings": { "data_rate": { "lora": { "spreading_factor": 9 } } }
            }
        });
        Bytes::from(serde_json::to_vec(&document).unwrap())
    }

    #[tokio::test]
    async fn test_retries_until_cancelled() {
        let mut repository = MockCredentialRepository::new();
        repository.expect_get_credential().times(0);
        let mut provisioner = MockDeviceProvisioner::new();
        provisioner.expect_provision().times(0);

        let (sender, _receiver) = outbound_queue();
        let service = Arc::new(UplinkService::new(
            Arc::new(repository),
            Arc::new(provisioner),
            sender,
        ));

        let subscriber = UplinkSubscriber::new(
            application(closed_port()),
            service,
            ReconnectStrategy::Fixed {
                interval: Duration::from_millis(10),
            },
            Arc::new(Semaphore::new(4)),
            Duration::from_secs(1),
        );

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(subscriber.run(ctx.clone()));

        // Several connection attempts fail in this window; none stops the loop
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());

        ctx.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("subscriber should stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_subscription_ends_session_after_connack() {
        let (port, sessions) = flaky_broker(SUBACK_FAILURE).await;
        let subscriber = UplinkSubscriber::new(
            application(port),
            idle_service(),
            ReconnectStrategy::default(),
            Arc::new(Semaphore::new(1)),
            Duration::from_secs(1),
        );

        let ctx = CancellationToken::new();
        let mut dispatch = JoinSet::new();
        let mut attempt = 7;
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            subscriber.run_mqtt_connection(&ctx, &mut dispatch, &mut attempt),
        )
        .await
        .expect("session should end once the subscription is rejected");

        assert!(matches!(
            result,
            Err(DomainError::MqttError(message)) if message.contains("rejected subscription")
        ));
        assert_eq!(attempt, 0);
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_reconnects_with_reset_backoff() {
        let (port, sessions) = flaky_broker(SUBACK_QOS1).await;
        let subscriber = UplinkSubscriber::new(
            application(port),
            idle_service(),
            ReconnectStrategy::Exponential {
                initial: Duration::from_millis(50),
                max: Duration::from_secs(60),
            },
            Arc::new(Semaphore::new(1)),
            Duration::from_secs(1),
        );

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(subscriber.run(ctx.clone()));

        // Every session is acknowledged before it drops, so the delay stays at
        // its initial value. A growing backoff would allow about four sessions.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(!handle.is_finished());
        let established = sessions.load(Ordering::SeqCst);
        assert!(
            established >= 6,
            "expected steady reconnects, got {} sessions",
            established
        );

        ctx.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("subscriber should stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dispatched_uplinks_are_processed_and_drained() {
        let repository = InMemoryCredentialRepository::new();
        repository
            .create_credential(CreateCredentialRepoInput {
                device_eui: "0011223344556677".to_string(),
                access_token: "known-token".to_string(),
            })
            .await
            .unwrap();

        let mut provisioner = MockDeviceProvisioner::new();
        provisioner.expect_provision().times(0);

        let (sender, mut receiver) = outbound_queue();
        let service = Arc::new(UplinkService::new(
            Arc::new(repository),
            Arc::new(provisioner),
            sender,
        ));

        let subscriber = UplinkSubscriber::new(
            application(closed_port()),
            service,
            ReconnectStrategy::default(),
            Arc::new(Semaphore::new(1)),
            Duration::from_secs(1),
        );

        let mut dispatch = JoinSet::new();
        let topic = "v3/weather-stations@ttn/devices/eui-0011223344556677/up".to_string();
        subscriber.dispatch_uplink(&mut dispatch, topic.clone(), Bytes::from_static(b"not json"));
        subscriber.dispatch_uplink(&mut dispatch, topic.clone(), uplink_payload("0011223344556677"));
        subscriber.dispatch_uplink(&mut dispatch, topic, uplink_payload("0011223344556677"));

        subscriber.drain_dispatch(&mut dispatch).await;
        assert!(dispatch.is_empty());

        let mut delivered = Vec::new();
        while let Ok(item) = receiver.try_recv() {
            delivered.push(item);
        }
        assert_eq!(delivered.len(), 2);
        for item in delivered {
            match item {
                OutboundItem::Telemetry {
                    access_token,
                    telemetry,
                    ..
                } => {
                    assert_eq!(access_token, "known-token");
                    assert_eq!(telemetry["battery"], serde_json::json!(3.6));
                    assert_eq!(telemetry["spreadingFactor"], serde_json::json!(9));
                }
                other => panic!("expected telemetry, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_uplinks() {
        let mut repository = MockCredentialRepository::new();
        repository.expect_get_credential().returning(|_| Ok(None));
        repository
            .expect_create_credential()
            .returning(|input| {
                Ok(DeviceCredential {
                    device_eui: input.device_eui,
                    access_token: input.access_token,
                    created_at: chrono::Utc::now(),
                })
            });
        let mut provisioner = MockDeviceProvisioner::new();
        provisioner
            .expect_provision()
            .returning(|_, _| Ok("token".to_string()));

        let (sender, _receiver) = outbound_queue();
        let service = Arc::new(UplinkService::new(
            Arc::new(repository),
            Arc::new(provisioner),
            sender,
        ));

        // No permits: every dispatched uplink waits forever
        let subscriber = UplinkSubscriber::new(
            application(closed_port()),
            service,
            ReconnectStrategy::default(),
            Arc::new(Semaphore::new(0)),
            Duration::from_millis(50),
        );

        let mut dispatch = JoinSet::new();
        subscriber.dispatch_uplink(
            &mut dispatch,
            "v3/app/devices/dev/up".to_string(),
            uplink_payload("0011223344556677"),
        );

        tokio::time::timeout(Duration::from_secs(1), subscriber.drain_dispatch(&mut dispatch))
            .await
            .expect("drain should give up after the shutdown timeout");
        assert!(dispatch.is_empty());
    }
}
