pub mod redpanda;

pub use redpanda::{DeadLetterPublisher, PublishError, RedpandaClient, RedpandaSubscriber};
