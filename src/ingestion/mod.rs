// ============================================================================
// Ingestion - Message Channel to Store and Cache
// ============================================================================
//
// - consumer: per-message handler, outcome classification and acking
// - dead_letter: envelope and sink for permanently rejected payloads
//
// ============================================================================

mod consumer;
mod dead_letter;

pub use consumer::{
    AckError, Acknowledger, IngestError, IngestionConsumer, MessageOrigin, MessageState,
};
pub use dead_letter::{DeadLetter, DeadLetterSink};
