use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::cache::Cache;
use crate::messaging::{Broker, ConsumerError, EventConsumer};
use crate::utils::RetryConfig;

// ============================================================================
// Lifecycle Controller
// ============================================================================
//
// Owns the consumer task and its shutdown signal.
//
// Shutdown order:
//   1. signal the consumer and wait for it to stop (bounded)
//   2. close the broker
//   3. close the cache
//   4. close the store
//
// A close failure is logged and the sequence continues.
//
// ============================================================================

/// A resource that must be released on shutdown.
#[async_trait]
pub trait Closable: Send + Sync {
    fn name(&self) -> &'static str;

    async fn close(&self) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error("Consumer task crashed: {0}")]
    Crashed(#[from] JoinError),
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub shutdown_timeout: Duration,
    /// How many times a failed consumer loop is restarted. Zero disables it.
    pub max_restarts: u32,
    pub restart_backoff: RetryConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            max_restarts: 0,
            restart_backoff: RetryConfig::default(),
        }
    }
}

enum Outcome {
    Stop,
    Exited(Result<Result<(), ConsumerError>, JoinError>),
}

pub struct Lifecycle {
    consumer: Arc<EventConsumer>,
    broker: Arc<dyn Broker>,
    cache: Option<Arc<dyn Cache>>,
    store: Arc<dyn Closable>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<Result<(), ConsumerError>>>,
    config: LifecycleConfig,
}

impl Lifecycle {
    pub fn new(
        consumer: Arc<EventConsumer>,
        broker: Arc<dyn Broker>,
        cache: Option<Arc<dyn Cache>>,
        store: Arc<dyn Closable>,
        config: LifecycleConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            consumer,
            broker,
            cache,
            store,
            shutdown,
            task: None,
            config,
        }
    }

    /// Spawn the consumer loop. A loop that is already running is left alone.
    pub fn start(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::warn!("Consumer already started");
            return;
        }

        let consumer = self.consumer.clone();
        let shutdown = self.shutdown.subscribe();
        self.task = Some(tokio::spawn(async move { consumer.start(shutdown).await }));
        tracing::info!("🚀 Consumer task started");
    }

    /// Wait for `stop` or for the consumer loop to fail.
    ///
    /// A failed loop is restarted up to `max_restarts` times, with backoff.
    /// Returns `Ok` once `stop` completes (or the loop ends on its own) and
    /// the last error once restarts are exhausted.
    pub async fn supervise<S>(&mut self, stop: S) -> Result<(), LifecycleError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut restarts = 0;

        loop {
            let outcome = match self.task.as_mut() {
                Some(task) => tokio::select! {
                    _ = &mut stop => Outcome::Stop,
                    joined = task => Outcome::Exited(joined),
                },
                None => {
                    (&mut stop).await;
                    Outcome::Stop
                }
            };

            let error: LifecycleError = match outcome {
                Outcome::Stop => {
                    tracing::info!("Stop requested");
                    return Ok(());
                }
                Outcome::Exited(joined) => {
                    self.task = None;
                    match joined {
                        Ok(Ok(())) => {
                            tracing::info!("Consumer loop ended");
                            return Ok(());
                        }
                        Ok(Err(e)) => e.into(),
                        Err(e) => e.into(),
                    }
                }
            };

            if restarts >= self.config.max_restarts {
                tracing::error!(error = %error, restarts, "Consumer failed, not restarting");
                return Err(error);
            }

            restarts += 1;
            let delay = self.config.restart_backoff.delay_for(restarts);
            tracing::warn!(
                error = %error,
                restart = restarts,
                max_restarts = self.config.max_restarts,
                delay_ms = delay.as_millis() as u64,
                "Consumer failed, restarting"
            );

            tokio::select! {
                _ = &mut stop => {
                    tracing::info!("Stop requested during restart backoff");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => self.start(),
            }
        }
    }

    /// Stop the consumer, then close broker, cache and store in that order.
    pub async fn shutdown(mut self) {
        tracing::info!("🛑 Shutting down");
        self.shutdown.send_replace(true);

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => tracing::info!("Consumer stopped"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Consumer ended with error"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Consumer task crashed"),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                        "Consumer did not stop in time, aborting"
                    );
                    task.abort();
                    // Wait for cancellation so nothing below races the loop
                    let _ = task.await;
                }
            }
        }

        close_logged(self.broker.name(), self.broker.close()).await;
        if let Some(cache) = &self.cache {
            close_logged(cache.name(), cache.close()).await;
        }
        close_logged(self.store.name(), self.store.close()).await;

        tracing::info!("Shutdown complete");
    }
}

async fn close_logged<F>(name: &'static str, close: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match close.await {
        Ok(()) => tracing::info!(resource = name, "Closed"),
        Err(e) => tracing::error!(resource = name, error = %e, "Failed to close"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Book;
    use crate::messaging::{ConsumerState, Envelope, Event, EventProducer, EventType};
    use crate::metrics::Metrics;
    use crate::testing::{CloseLog, FailingCache, MemoryBroker, MemoryCache, MemoryStore};
    use tokio::sync::{mpsc, oneshot};

    const WAIT: Duration = Duration::from_secs(2);

    struct RecordOnDrop(CloseLog, &'static str);

    impl Drop for RecordOnDrop {
        fn drop(&mut self) {
            self.0.record(self.1);
        }
    }

    fn fast_restarts(max_restarts: u32) -> LifecycleConfig {
        LifecycleConfig {
            shutdown_timeout: Duration::from_millis(200),
            max_restarts,
            restart_backoff: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
        }
    }

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_shutdown_stops_consumer_then_closes_in_order() {
        let log = CloseLog::default();
        let broker = Arc::new(MemoryBroker::with_close_log(log.clone()));
        let consumer = Arc::new(EventConsumer::new(broker.clone(), metrics()));

        let mut lifecycle = Lifecycle::new(
            consumer.clone(),
            broker.clone(),
            Some(Arc::new(MemoryCache::with_close_log(log.clone()))),
            Arc::new(MemoryStore::books().close_log(log.clone())),
            fast_restarts(0),
        );
        lifecycle.start();
        consumer
            .subscribe_state()
            .wait_for(|s| *s == ConsumerState::Running)
            .await
            .unwrap();

        lifecycle.shutdown().await;

        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert_eq!(log.entries(), vec!["broker", "cache", "store"]);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_close_failure_does_not_abort_sequence() {
        let log = CloseLog::default();
        let broker = Arc::new(MemoryBroker::with_close_log(log.clone()));
        let consumer = Arc::new(EventConsumer::new(broker.clone(), metrics()));

        let lifecycle = Lifecycle::new(
            consumer,
            broker,
            Some(Arc::new(FailingCache::with_close_log(log.clone()))),
            Arc::new(MemoryStore::users().close_log(log.clone())),
            fast_restarts(0),
        );

        lifecycle.shutdown().await;

        assert_eq!(log.entries(), vec!["broker", "cache", "store"]);
    }

    #[tokio::test]
    async fn test_stuck_consumer_is_aborted_after_timeout() {
        let log = CloseLog::default();
        let broker = Arc::new(MemoryBroker::with_close_log(log.clone()));
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();

        let mut consumer = EventConsumer::new(broker.clone(), metrics());
        let handler_log = log.clone();
        consumer.register_handler(EventType::BookDeleted, move |_: Envelope| {
            let entered = entered_tx.clone();
            let log = handler_log.clone();
            async move {
                let _dropped = RecordOnDrop(log, "handler");
                let _ = entered.send(());
                std::future::pending::<()>().await;
                anyhow::Ok(())
            }
        });
        let consumer = Arc::new(consumer);

        let mut lifecycle = Lifecycle::new(
            consumer,
            broker.clone(),
            None,
            Arc::new(MemoryStore::books().close_log(log.clone())),
            fast_restarts(0),
        );
        lifecycle.start();

        EventProducer::new(broker.clone(), metrics())
            .publish(Event::BookDeleted { id: uuid::Uuid::new_v4() })
            .await
            .unwrap();
        tokio::time::timeout(WAIT, entered_rx.recv()).await.unwrap();

        tokio::time::timeout(WAIT, lifecycle.shutdown()).await.unwrap();
        // The aborted handler is gone before the broker closes
        assert_eq!(log.entries(), vec!["handler", "broker", "store"]);
    }

    #[tokio::test]
    async fn test_supervise_restarts_failed_consumer() {
        let broker = Arc::new(MemoryBroker::new());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let mut consumer = EventConsumer::new(broker.clone(), metrics());
        consumer.register_handler(EventType::BookCreated, move |envelope: Envelope| {
            let seen = seen_tx.clone();
            async move {
                let _ = seen.send(envelope.id);
                anyhow::Ok(())
            }
        });
        let consumer = Arc::new(consumer);

        broker.fail_next_receive();
        let mut lifecycle = Lifecycle::new(
            consumer,
            broker.clone(),
            None,
            Arc::new(MemoryStore::books()),
            fast_restarts(1),
        );
        lifecycle.start();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let producer = EventProducer::new(broker.clone(), metrics());
        let check = tokio::spawn(async move {
            let sent = producer
                .publish(Event::BookCreated {
                    book: Book::new("sci-fi", "Dune", "Herbert", 1965),
                })
                .await
                .unwrap();
            let seen = tokio::time::timeout(WAIT, seen_rx.recv()).await.unwrap();
            let _ = stop_tx.send(());
            (sent.id, seen)
        });

        let result = lifecycle
            .supervise(async {
                let _ = stop_rx.await;
            })
            .await;
        assert!(result.is_ok());

        let (sent, seen) = check.await.unwrap();
        assert_eq!(seen, Some(sent));
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn test_supervise_returns_error_without_restarts() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = Arc::new(EventConsumer::new(broker.clone(), metrics()));

        broker.fail_next_receive();
        let mut lifecycle = Lifecycle::new(
            consumer,
            broker,
            None,
            Arc::new(MemoryStore::books()),
            fast_restarts(0),
        );
        lifecycle.start();

        let result = tokio::time::timeout(WAIT, lifecycle.supervise(std::future::pending()))
            .await
            .unwrap();

        assert!(matches!(
            result,
            Err(LifecycleError::Consumer(ConsumerError::Receive(_)))
        ));
        lifecycle.shutdown().await;
    }
}
