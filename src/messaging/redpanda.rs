use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    message::Message,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
    Offset, TopicPartitionList,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::RedpandaConfig;
use crate::health::{HealthMonitor, HealthStatus};
use crate::ingestion::{
    AckError, Acknowledger, DeadLetter, DeadLetterSink, IngestionConsumer, MessageOrigin,
    MessageState,
};
use crate::metrics::Metrics;
use crate::utils::{
    retry_on_transient, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    IsTransient, RetryConfig,
};

// ============================================================================
// Redpanda Adapter
// ============================================================================
//
// - RedpandaSubscriber: consumes the orders topic with manual commits and
//   feeds every message to the IngestionConsumer
// - RedpandaClient: circuit-breaker protected producer
// - DeadLetterPublisher: DeadLetterSink on top of RedpandaClient
//
// ============================================================================

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Circuit breaker open for Redpanda")]
    CircuitOpen,

    #[error("Kafka send error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Failed to encode dead letter: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IsTransient for PublishError {
    fn is_transient(&self) -> bool {
        matches!(self, PublishError::Kafka(_))
    }
}

// ============================================================================
// Producer
// ============================================================================

pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaClient {
    pub fn new(brokers: &str, metrics: Arc<Metrics>) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };
        let circuit_breaker = CircuitBreaker::new(cb_config)
            .on_transition(move |state| metrics.update_circuit_breaker_state(state));

        Ok(Self {
            producer,
            circuit_breaker,
        })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(topic).key(key).payload(payload);

                self.producer
                    .send(record, Timeout::After(SEND_TIMEOUT))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| e)
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(topic = %topic, key = %key, "Published to Redpanda");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %topic, "Circuit breaker open - Redpanda unavailable");
                Err(PublishError::CircuitOpen)
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %topic, "Failed to publish to Redpanda");
                Err(PublishError::Kafka(e))
            }
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}

pub struct DeadLetterPublisher {
    client: Arc<RedpandaClient>,
    topic: String,
    metrics: Arc<Metrics>,
}

impl DeadLetterPublisher {
    pub fn new(client: Arc<RedpandaClient>, topic: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            topic: topic.into(),
            metrics,
        }
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterPublisher {
    async fn publish(&self, letter: &DeadLetter) -> Result<(), PublishError> {
        let body = serde_json::to_vec(letter)?;
        let key = letter
            .order_uid
            .clone()
            .unwrap_or_else(|| letter.id.to_string());

        retry_on_transient(RetryConfig::dead_letter(), |attempt| {
            if attempt > 1 {
                self.metrics.record_retry_attempt("dead_letter_publish");
            }
            self.client.publish(&self.topic, &key, &body)
        })
        .await
        .into_result()
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Commits the offset right after one message.
struct KafkaAck<'a> {
    consumer: &'a StreamConsumer,
    origin: MessageOrigin,
    attempted: AtomicBool,
}

impl Acknowledger for KafkaAck<'_> {
    fn origin(&self) -> MessageOrigin {
        self.origin.clone()
    }

    fn ack(&self) -> Result<(), AckError> {
        self.attempted.store(true, Ordering::SeqCst);

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &self.origin.topic,
                self.origin.partition,
                Offset::Offset(self.origin.offset + 1),
            )
            .map_err(|e| AckError(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| AckError(e.to_string()))
    }
}

/// A message must be read again only when the consumer left it unsettled.
///
/// Once an ack was attempted the message is settled from our side, even if
/// the commit failed: rewinding would replay a finished message.
fn needs_redelivery(ack_attempted: bool, state: MessageState) -> bool {
    state == MessageState::Rejected && !ack_attempted
}

/// Failed deliveries of the message currently being rewound.
struct Redelivery {
    config: RetryConfig,
    pending: Option<MessageOrigin>,
    failures: u32,
    delay: Duration,
}

impl Redelivery {
    fn new(config: RetryConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            pending: None,
            failures: 0,
            delay,
        }
    }

    /// The next delivery of `origin` is the last one it gets.
    fn is_final(&self, origin: &MessageOrigin) -> bool {
        self.pending.as_ref() == Some(origin) && self.failures + 1 >= self.config.max_attempts
    }

    /// Record a failed delivery and return the pause before the next one.
    fn failed(&mut self, origin: &MessageOrigin) -> Duration {
        if self.pending.as_ref() != Some(origin) {
            self.settled();
            self.pending = Some(origin.clone());
        }

        self.failures += 1;
        let delay = self.delay;
        self.delay = self.config.next_delay(delay);
        delay
    }

    fn settled(&mut self) {
        self.pending = None;
        self.failures = 0;
        self.delay = self.config.initial_delay;
    }
}

pub struct RedpandaSubscriber {
    consumer: StreamConsumer,
    topic: String,
    health: Arc<HealthMonitor>,
}

impl RedpandaSubscriber {
    pub fn new(config: &RedpandaConfig, health: Arc<HealthMonitor>) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(
            topic = %config.topic,
            group_id = %config.group_id,
            brokers = %config.brokers,
            "📡 Subscribed to orders topic"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            health,
        })
    }

    /// Feed messages to `ingestion` until `shutdown` fires.
    ///
    /// The message in flight when shutdown arrives is finished first. A
    /// message left unacknowledged is re-read from the same offset after a
    /// backoff, since committing any later offset would skip it. Its last
    /// permitted delivery is settled whatever the outcome.
    pub async fn run(self, ingestion: Arc<IngestionConsumer>, mut shutdown: watch::Receiver<bool>) {
        let mut redelivery = Redelivery::new(RetryConfig::redelivery());
        let mut degraded = false;

        self.health.update("ingestion", HealthStatus::Healthy, None).await;

        loop {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.consumer.recv() => received,
            };

            let message = match received {
                Ok(message) => message.detach(),
                Err(e) => {
                    tracing::warn!(error = %e, topic = %self.topic, "Kafka receive error");
                    self.health
                        .update("ingestion", HealthStatus::Degraded(e.to_string()), None)
                        .await;
                    degraded = true;
                    continue;
                }
            };

            let ack = KafkaAck {
                consumer: &self.consumer,
                origin: MessageOrigin {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                },
                attempted: AtomicBool::new(false),
            };

            // An empty payload fails to decode like any other malformed one.
            let payload = message.payload().unwrap_or_default();
            let state = if redelivery.is_final(&ack.origin) {
                ingestion.on_final_delivery(payload, &ack).await
            } else {
                ingestion.on_message(payload, &ack).await
            };

            if !needs_redelivery(ack.attempted.load(Ordering::SeqCst), state) {
                redelivery.settled();
                if degraded {
                    self.health.update("ingestion", HealthStatus::Healthy, None).await;
                    degraded = false;
                }
                continue;
            }

            self.health
                .update(
                    "ingestion",
                    HealthStatus::Degraded("Store writes failing".to_string()),
                    Some(format!("offset {} awaiting redelivery", ack.origin.offset)),
                )
                .await;
            degraded = true;

            let delay = redelivery.failed(&ack.origin);
            tracing::warn!(
                partition = ack.origin.partition,
                offset = ack.origin.offset,
                delay_ms = delay.as_millis() as u64,
                "Rewinding to unacknowledged message"
            );

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = self.consumer.seek(
                &ack.origin.topic,
                ack.origin.partition,
                Offset::Offset(ack.origin.offset),
                SEEK_TIMEOUT,
            ) {
                tracing::error!(error = %e, "Failed to rewind partition");
            }
        }

        tracing::info!(topic = %self.topic, "Subscription loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_kafka_errors_are_retried() {
        assert!(PublishError::Kafka(KafkaError::Canceled).is_transient());
        assert!(!PublishError::CircuitOpen.is_transient());

        let encode = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(!PublishError::Encode(encode).is_transient());
    }

    #[tokio::test]
    async fn test_producer_starts_with_closed_breaker() {
        // Creating a producer does not contact the broker.
        let metrics = Arc::new(Metrics::new().unwrap());
        let client = RedpandaClient::new("127.0.0.1:1", metrics).unwrap();

        assert_eq!(client.circuit_state().await, CircuitState::Closed);
    }

    fn origin(offset: i64) -> MessageOrigin {
        MessageOrigin {
            topic: "orders".to_string(),
            partition: 0,
            offset,
        }
    }

    fn fast_redelivery(max_attempts: u32) -> Redelivery {
        Redelivery::new(RetryConfig {
            operation: "redelivery",
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
        })
    }

    #[test]
    fn test_acked_message_is_settled() {
        assert!(!needs_redelivery(true, MessageState::Acknowledged));
    }

    #[test]
    fn test_cached_message_with_failed_ack_is_settled() {
        assert!(!needs_redelivery(true, MessageState::Cached));
    }

    #[test]
    fn test_transient_rejection_is_redelivered() {
        assert!(needs_redelivery(false, MessageState::Rejected));
    }

    #[test]
    fn test_permanent_rejection_with_failed_ack_is_not_replayed() {
        assert!(!needs_redelivery(true, MessageState::Rejected));
    }

    #[test]
    fn test_redelivery_backs_off_then_caps() {
        let mut redelivery = fast_redelivery(10);
        let delays: Vec<_> = (0..4).map(|_| redelivery.failed(&origin(5))).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(40),
            ]
        );
    }

    #[test]
    fn test_last_delivery_is_final() {
        let mut redelivery = fast_redelivery(3);
        assert!(!redelivery.is_final(&origin(5)));

        redelivery.failed(&origin(5));
        assert!(!redelivery.is_final(&origin(5)));

        redelivery.failed(&origin(5));
        assert!(redelivery.is_final(&origin(5)));
        assert!(!redelivery.is_final(&origin(6)));
    }

    #[test]
    fn test_settling_resets_backoff() {
        let mut redelivery = fast_redelivery(3);
        redelivery.failed(&origin(5));
        redelivery.failed(&origin(5));

        redelivery.settled();

        assert!(!redelivery.is_final(&origin(5)));
        assert_eq!(redelivery.failed(&origin(5)), Duration::from_millis(10));
    }

    #[test]
    fn test_new_message_starts_fresh() {
        let mut redelivery = fast_redelivery(3);
        redelivery.failed(&origin(5));
        redelivery.failed(&origin(5));

        assert_eq!(redelivery.failed(&origin(6)), Duration::from_millis(10));
        assert!(!redelivery.is_final(&origin(6)));
    }
}
