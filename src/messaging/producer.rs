use std::sync::Arc;

use super::{Broker, BrokerError, Envelope, Event};
use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Wraps events in envelopes and hands them to the broker, keyed by type.
#[derive(Clone)]
pub struct EventProducer {
    broker: Arc<dyn Broker>,
    metrics: Arc<Metrics>,
}

impl EventProducer {
    pub fn new(broker: Arc<dyn Broker>, metrics: Arc<Metrics>) -> Self {
        Self { broker, metrics }
    }

    /// Publish one event. The returned envelope is what went on the wire.
    pub async fn publish(&self, event: Event) -> Result<Envelope, PublishError> {
        let envelope = Envelope::new(event);
        let event_type = envelope.event_type();

        let result = self.send(&envelope).await;
        self.metrics
            .record_publish(event_type.as_str(), result.is_ok());

        match result {
            Ok(()) => {
                tracing::debug!(
                    event_id = %envelope.id,
                    event_type = %event_type,
                    "📤 Event published"
                );
                Ok(envelope)
            }
            Err(e) => {
                tracing::error!(
                    event_id = %envelope.id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to publish event"
                );
                Err(e)
            }
        }
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let bytes = envelope.to_bytes()?;
        self.broker
            .publish(envelope.event_type().as_str(), &bytes)
            .await?;
        Ok(())
    }
}
