// ============================================================================
// Messaging - Broker contract, event envelope, producer and consumer
// ============================================================================
//
// One logical topic carries every envelope. The message key is the event
// type tag so events of the same type land in the same partition.
//
// The broker is a best-effort transport: an event lost on a failed publish
// is not retried, and nothing is persisted outside the broker itself.
//
// ============================================================================

mod consumer;
mod envelope;
pub mod handlers;
mod kafka;
mod producer;

use async_trait::async_trait;

use crate::lifecycle::Closable;

pub use consumer::{ConsumerError, ConsumerState, EventConsumer, EventHandler};
pub use envelope::{Envelope, EnvelopeError, Event, EventType, LoginPayload};
pub use kafka::{KafkaBroker, KafkaConfig};
pub use producer::{EventProducer, PublishError};

/// One message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker client setup failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Broker circuit breaker is open")]
    CircuitOpen,

    #[error("Broker is closed")]
    Closed,
}

#[async_trait]
pub trait Broker: Closable + Send + Sync {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Wait for the next message.
    /// Dropping the returned future before it completes must not lose a
    /// message.
    async fn receive(&self) -> Result<BrokerMessage, BrokerError>;
}
