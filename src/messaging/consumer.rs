use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::{Broker, BrokerError, BrokerMessage, Envelope, EventType};
use crate::metrics::Metrics;

// ============================================================================
// Event Consumer
// ============================================================================
//
// A single sequential receive loop:
//
//   receive -> decode -> handlers for the type, in registration order
//
// - A malformed envelope or a type nobody handles is logged and skipped
// - A failing handler is logged; the remaining handlers still run
// - The shutdown signal is observed between receives; an envelope that
//   was already received is dispatched to completion first
// - A receive error ends the loop and is returned to the caller, which
//   owns the restart decision
//
// State: Created -> Running -> Draining -> Stopped
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Broker receive failed: {0}")]
    Receive(#[source] BrokerError),

    #[error("Consumer loop is already running")]
    AlreadyRunning,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope) -> anyhow::Result<()> {
        (self)(envelope).await
    }
}

pub struct EventConsumer {
    broker: Arc<dyn Broker>,
    handlers: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
    state: watch::Sender<ConsumerState>,
    running: AtomicBool,
    metrics: Arc<Metrics>,
}

/// Clears the running flag however the loop exits
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EventConsumer {
    pub fn new(broker: Arc<dyn Broker>, metrics: Arc<Metrics>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Created);
        Self {
            broker,
            handlers: HashMap::new(),
            state,
            running: AtomicBool::new(false),
            metrics,
        }
    }

    /// Append a handler for `event_type`. Invocation follows registration order.
    pub fn register_handler<H>(&mut self, event_type: EventType, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers.get(&event_type).map_or(0, Vec::len)
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run the receive loop until `shutdown` carries `true` (or its sender
    /// is dropped) or the broker fails.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ConsumerError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        self.state.send_replace(ConsumerState::Running);
        tracing::info!("🎧 Event consumer running");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Shutdown sender dropped, stopping consumer");
                        break;
                    }
                }

                received = self.broker.receive() => match received {
                    Ok(message) => self.dispatch(message).await,
                    Err(e) => {
                        tracing::error!(error = %e, "Event consumer receive failed, stopping");
                        self.state.send_replace(ConsumerState::Stopped);
                        return Err(ConsumerError::Receive(e));
                    }
                },
            }
        }

        self.state.send_replace(ConsumerState::Draining);
        tracing::info!("Event consumer draining");
        self.state.send_replace(ConsumerState::Stopped);
        tracing::info!("Event consumer stopped");
        Ok(())
    }

    async fn dispatch(&self, message: BrokerMessage) {
        let envelope = match Envelope::from_bytes(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    partition = message.partition,
                    offset = message.offset,
                    key = ?message.key,
                    error = %e,
                    "Skipping malformed envelope"
                );
                self.metrics.record_consumed("unknown", "malformed");
                return;
            }
        };

        let event_type = envelope.event_type();
        let handlers = match self.handlers.get(&event_type) {
            Some(handlers) if !handlers.is_empty() => handlers,
            _ => {
                tracing::debug!(
                    event_id = %envelope.id,
                    event_type = %event_type,
                    "No handler registered, skipping"
                );
                self.metrics.record_consumed(event_type.as_str(), "unhandled");
                return;
            }
        };

        tracing::debug!(
            event_id = %envelope.id,
            event_type = %event_type,
            partition = message.partition,
            offset = message.offset,
            handlers = handlers.len(),
            "📥 Dispatching event"
        );

        for (position, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler.handle(envelope.clone()).await {
                tracing::error!(
                    event_id = %envelope.id,
                    event_type = %event_type,
                    handler = position,
                    error = %e,
                    "Event handler failed"
                );
                self.metrics.record_handler_failure(event_type.as_str());
            }
        }

        self.metrics.record_consumed(event_type.as_str(), "handled");
    }
}
