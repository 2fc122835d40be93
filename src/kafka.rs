use crate::config::AppConfig;
use crate::error::PositionError;
use crate::models::message::DeviceMessage;
use crate::position::{PositionSample, PositionSource, PositionStream, WatchOptions};
use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::types::RDKafkaErrorCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Position source fed by the bus GPS unit's telemetry topic.
///
/// Each watch gets its own consumer group starting at the latest offset, so a
/// watch never replays positions published before it started.
pub struct KafkaPositionSource {
    client_config: ClientConfig,
    topic: String,
    group_prefix: String,
    device_id: Option<String>,
}

struct WatchState {
    consumer: Arc<StreamConsumer>,
    options: WatchOptions,
    device_id: Option<String>,
}

impl KafkaPositionSource {
    /// Builds the SASL-authenticated client configuration shared by every watch.
    pub fn new(config: &AppConfig) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("enable.auto.commit", "false")
            // SASL Configuration
            .set("security.protocol", &config.kafka_security_protocol)
            .set("sasl.mechanism", &config.kafka_sasl_mechanism)
            .set("sasl.username", &config.kafka_username)
            .set("sasl.password", &config.kafka_password);

        Self {
            client_config,
            topic: config.kafka_topic.clone(),
            group_prefix: config.kafka_group_id.clone(),
            device_id: config.position_device_id.clone(),
        }
    }
}

#[async_trait]
impl PositionSource for KafkaPositionSource {
    fn is_available(&self) -> bool {
        !self.topic.is_empty()
            && self
                .client_config
                .get("bootstrap.servers")
                .is_some_and(|s| !s.is_empty())
    }

    async fn watch(&self, options: WatchOptions) -> Result<PositionStream, PositionError> {
        let mut client_config = self.client_config.clone();
        let (group_id, offset_reset) = if options.maximum_age.is_zero() {
            (format!("{}-{}", self.group_prefix, Uuid::new_v4()), "latest")
        } else {
            (self.group_prefix.clone(), "earliest")
        };
        client_config
            .set("group.id", &group_id)
            .set("auto.offset.reset", offset_reset);

        let consumer: StreamConsumer = client_config.create().map_err(classify)?;
        consumer.subscribe(&[&self.topic]).map_err(classify)?;
        info!("Watching positions on topic {} (group {})", self.topic, group_id);

        let state = WatchState {
            consumer: Arc::new(consumer),
            options,
            device_id: self.device_id.clone(),
        };

        let stream = futures::stream::unfold(state, |state| async move {
            let item = next_sample(&state).await;
            Some((item, state))
        });
        Ok(stream.boxed())
    }
}

/// Waits for the next usable sample, or the error that ends the watch.
async fn next_sample(state: &WatchState) -> Result<PositionSample, PositionError> {
    let deadline = Instant::now() + state.options.timeout;
    loop {
        let m = recv_before(deadline, state.options.timeout, state.consumer.recv()).await?;
        let payload = match m.payload() {
            Some(p) => p,
            None => {
                warn!("Received empty payload from Kafka");
                continue;
            }
        };

        let message: DeviceMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to parse message: {}", e);
                continue;
            }
        };

        if let Some(sample) = accept(&message, &state.options, state.device_id.as_deref()) {
            return Ok(sample);
        }
    }
}

/// Runs one receive against the watch deadline.
async fn recv_before<T>(
    deadline: Instant,
    timeout: Duration,
    recv: impl Future<Output = Result<T, KafkaError>>,
) -> Result<T, PositionError> {
    match tokio::time::timeout_at(deadline, recv).await {
        Err(_) => Err(PositionError::Timeout(timeout)),
        Ok(received) => received.map_err(classify),
    }
}

/// Sample carried by `message`, if it passes the device and accuracy filters.
fn accept(
    message: &DeviceMessage,
    options: &WatchOptions,
    device_id: Option<&str>,
) -> Option<PositionSample> {
    if let Some(wanted) = device_id {
        if message.get_device_id().map(String::as_str) != Some(wanted) {
            return None;
        }
    }
    if options.high_accuracy && !message.has_fix() {
        debug!("Skipping message {} without GPS fix", message.uuid);
        return None;
    }
    match message.to_sample() {
        Some(sample) => {
            debug!("Position from message {}: {}, {}", message.uuid, sample.lat, sample.lng);
            Some(sample)
        }
        None => {
            warn!("Message {} has no coordinates, skipping", message.uuid);
            None
        }
    }
}

fn classify(e: KafkaError) -> PositionError {
    match e.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => PositionError::PermissionDenied(e.to_string()),
        _ => PositionError::Unavailable(e.to_string()),
    }
}
