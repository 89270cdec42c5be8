use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Broker, BrokerError, BrokerMessage};
use crate::lifecycle::Closable;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Kafka Broker
// ============================================================================
//
// Producer: FutureProducer behind a circuit breaker, so a dead cluster
// fails publishes fast instead of stalling every write for the full
// delivery timeout.
//
// Consumer: StreamConsumer in one consumer group, offsets auto-committed.
// `recv()` is cancel-safe, which lets the event consumer drop a pending
// receive on shutdown.
//
// ============================================================================

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

impl KafkaConfig {
    fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("message.timeout.ms", "5000")
            .set("acks", "all");
        config
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false");
        config
    }
}

pub struct KafkaBroker {
    producer: FutureProducer,
    consumer: StreamConsumer,
    topic: String,
    breaker: CircuitBreaker,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig, metrics: Arc<Metrics>) -> Result<Self, BrokerError> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| BrokerError::Connection(format!("producer: {}", e)))?;

        let consumer: StreamConsumer = config
            .consumer_config()
            .create()
            .map_err(|e| BrokerError::Connection(format!("consumer: {}", e)))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| BrokerError::Connection(format!("subscribe {}: {}", config.topic, e)))?;

        tracing::info!(
            brokers = %config.bootstrap_servers(),
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka broker ready"
        );

        Ok(Self {
            producer,
            consumer,
            topic: config.topic.clone(),
            breaker: CircuitBreaker::new("kafka-producer", CircuitBreakerConfig::default()),
            closed: AtomicBool::new(false),
            metrics,
        })
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn publish(&self, key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let result = self
            .breaker
            .call(async {
                let record = FutureRecord::to(&self.topic).key(key).payload(payload);
                self.producer
                    .send(record, Timeout::After(SEND_TIMEOUT))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| e)
            })
            .await;

        self.metrics
            .update_circuit_breaker_state(self.breaker.state().as_gauge());

        match result {
            Ok(()) => {
                tracing::trace!(topic = %self.topic, key = %key, "Delivered to Kafka");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => Err(BrokerError::CircuitOpen),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(BrokerError::Publish(e.to_string())),
        }
    }

    async fn receive(&self) -> Result<BrokerMessage, BrokerError> {
        self.ensure_open()?;

        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Receive(e.to_string()))?;

        Ok(BrokerMessage {
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            partition: message.partition(),
            offset: message.offset(),
        })
    }
}

#[async_trait]
impl Closable for KafkaBroker {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.consumer.unsubscribe();

        // flush blocks the calling thread until queued messages are delivered
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await??;

        tracing::info!(topic = %self.topic, "Kafka broker closed");
        Ok(())
    }
}
