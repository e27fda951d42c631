use std::sync::Arc;
use std::time::Instant;

use super::dead_letter::{DeadLetter, DeadLetterSink};
use crate::cache::OrderCache;
use crate::db::{OrderStore, StoreError};
use crate::domain::order::{DecodeError, Order};
use crate::metrics::Metrics;

// ============================================================================
// Ingestion Consumer
// ============================================================================
//
// Per message:
//   Received -> Decoded -> Persisted -> Cached -> Acknowledged
//                  \            \
//                   `-----------`--> Rejected
//
// The store is written before the cache, and the channel is acked only once
// both hold the order. Permanent rejections are dead-lettered and acked so a
// poison message cannot block its partition; transient ones are left unacked
// for redelivery until the channel's last attempt, which settles like a
// permanent one.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Received,
    Decoded,
    Persisted,
    Cached,
    Acknowledged,
    Rejected,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Malformed order payload: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Write(#[from] StoreError),
}

impl IngestError {
    /// Redelivering the same message would fail the same way.
    pub fn is_permanent(&self) -> bool {
        match self {
            IngestError::Decode(_) => true,
            IngestError::Write(e) => e.is_permanent(),
        }
    }

    /// Metric label and dead-letter reason.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "decode",
            IngestError::Write(StoreError::Duplicate(_)) => "duplicate",
            IngestError::Write(StoreError::Rejected { .. }) => "refused",
            IngestError::Write(_) => "write",
        }
    }

    /// The first state the message failed to reach.
    pub fn failed_stage(&self) -> MessageState {
        match self {
            IngestError::Decode(_) => MessageState::Decoded,
            IngestError::Write(_) => MessageState::Persisted,
        }
    }

    pub fn order_uid(&self) -> Option<&str> {
        match self {
            IngestError::Decode(DecodeError::NegativeAmount { order_uid, .. }) => Some(order_uid),
            IngestError::Decode(_) => None,
            IngestError::Write(StoreError::Duplicate(order_uid))
            | IngestError::Write(StoreError::Write { order_uid, .. })
            | IngestError::Write(StoreError::Rejected { order_uid, .. })
            | IngestError::Write(StoreError::Incomplete { order_uid, .. }) => Some(order_uid),
            IngestError::Write(_) => None,
        }
    }
}

/// Where a delivered message came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOrigin {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to acknowledge message: {0}")]
pub struct AckError(pub String);

/// Handle to one delivered message, used to confirm it to the channel.
pub trait Acknowledger: Send + Sync {
    fn origin(&self) -> MessageOrigin;

    fn ack(&self) -> Result<(), AckError>;
}

pub struct IngestionConsumer {
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
    metrics: Arc<Metrics>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl IngestionConsumer {
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<OrderCache>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            cache,
            metrics,
            dead_letters: None,
        }
    }

    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Decode, persist and cache one payload.
    ///
    /// On success the order is in both the store and the cache. On error it
    /// is in neither.
    pub async fn handle(&self, payload: &[u8]) -> Result<String, IngestError> {
        let started = Instant::now();
        tracing::trace!(
            bytes = payload.len(),
            state = ?MessageState::Received,
            "Message received"
        );

        let order = Order::from_payload(payload)?;
        let order_uid = order.order_uid.clone();
        tracing::debug!(order_uid = %order_uid, state = ?MessageState::Decoded, "Order decoded");

        self.store.insert(&order).await?;
        tracing::debug!(order_uid = %order_uid, state = ?MessageState::Persisted, "Order persisted");

        self.cache.put(order).await;
        self.metrics.set_cache_size(self.cache.len().await);
        self.metrics.record_ingested(started.elapsed().as_secs_f64());
        tracing::debug!(order_uid = %order_uid, state = ?MessageState::Cached, "Order cached");

        Ok(order_uid)
    }

    /// Process one delivered message and settle it with the channel.
    ///
    /// Never fails: every outcome is logged, counted and reported as the
    /// final state.
    pub async fn on_message(&self, payload: &[u8], acknowledger: &dyn Acknowledger) -> MessageState {
        self.process(payload, acknowledger, false).await
    }

    /// Like [`on_message`](Self::on_message), for a message the channel will
    /// not redeliver again: a transient failure is dead-lettered and acked.
    pub async fn on_final_delivery(
        &self,
        payload: &[u8],
        acknowledger: &dyn Acknowledger,
    ) -> MessageState {
        self.process(payload, acknowledger, true).await
    }

    async fn process(
        &self,
        payload: &[u8],
        acknowledger: &dyn Acknowledger,
        final_delivery: bool,
    ) -> MessageState {
        match self.handle(payload).await {
            Ok(order_uid) => match acknowledger.ack() {
                Ok(()) => {
                    tracing::info!(order_uid = %order_uid, "📦 Order ingested");
                    MessageState::Acknowledged
                }
                Err(e) => {
                    tracing::warn!(
                        order_uid = %order_uid,
                        error = %e,
                        "Order stored but acknowledgment failed"
                    );
                    MessageState::Cached
                }
            },
            Err(error) => {
                self.reject(payload, &error, acknowledger, final_delivery).await;
                MessageState::Rejected
            }
        }
    }

    async fn reject(
        &self,
        payload: &[u8],
        error: &IngestError,
        acknowledger: &dyn Acknowledger,
        final_delivery: bool,
    ) {
        self.metrics.record_rejected(error.reason());
        let origin = acknowledger.origin();

        if !error.is_permanent() && !final_delivery {
            tracing::error!(
                error = %error,
                failed_stage = ?error.failed_stage(),
                partition = origin.partition,
                offset = origin.offset,
                "Transient ingestion failure, leaving message unacknowledged"
            );
            return;
        }

        tracing::warn!(
            error = %error,
            reason = error.reason(),
            failed_stage = ?error.failed_stage(),
            partition = origin.partition,
            offset = origin.offset,
            "Rejecting message permanently"
        );

        if let Some(sink) = &self.dead_letters {
            let mut letter = DeadLetter::new(&origin, payload, error);
            if !error.is_permanent() {
                letter.reason = "redelivery_exhausted".to_string();
            }
            match sink.publish(&letter).await {
                Ok(()) => {
                    self.metrics.record_dead_letter(true);
                    tracing::info!(dead_letter_id = %letter.id, "💀 Payload dead-lettered");
                }
                Err(e) => {
                    self.metrics.record_dead_letter(false);
                    tracing::error!(
                        dead_letter_id = %letter.id,
                        error = %e,
                        "Failed to dead-letter payload, dropping it"
                    );
                }
            }
        }

        if let Err(e) = acknowledger.ack() {
            tracing::warn!(error = %e, "Failed to acknowledge rejected message");
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
