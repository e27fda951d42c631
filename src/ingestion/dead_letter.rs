use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::consumer::{IngestError, MessageOrigin};
use crate::messaging::PublishError;

/// A payload the service will never accept, with enough context to replay it by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub source_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub order_uid: Option<String>,
    pub reason: String,
    pub error: String,
    /// Original bytes, lossily decoded as UTF-8
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(origin: &MessageOrigin, payload: &[u8], error: &IngestError) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_topic: origin.topic.clone(),
            partition: origin.partition,
            offset: origin.offset,
            order_uid: error.order_uid().map(str::to_string),
            reason: error.reason().to_string(),
            error: error.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            failed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, letter: &DeadLetter) -> Result<(), PublishError>;
}
