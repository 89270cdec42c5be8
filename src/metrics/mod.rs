// Private module declaration
mod server;

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Cache lookups (hit / miss / error) and failed cache writes
// - Event publishing outcomes
// - Event consumption and handler failures
// - Broker circuit breaker state
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub const OUTCOME_HIT: &str = "hit";
pub const OUTCOME_MISS: &str = "miss";
pub const OUTCOME_ERROR: &str = "error";

/// Central metrics registry for the service
pub struct Metrics {
    registry: Registry,

    // Cache Metrics
    pub cache_lookups: IntCounterVec,
    pub cache_write_failures: IntCounterVec,

    // Event Metrics
    pub events_published: IntCounterVec,
    pub events_consumed: IntCounterVec,
    pub handler_failures: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Cache lookups by entity kind, key type and outcome"),
            &["kind", "key_type", "outcome"],
        )?;
        registry.register(Box::new(cache_lookups.clone()))?;

        let cache_write_failures = IntCounterVec::new(
            Opts::new("cache_write_failures_total", "Cache writes or evictions that failed"),
            &["kind"],
        )?;
        registry.register(Box::new(cache_write_failures.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events handed to the broker"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_consumed = IntCounterVec::new(
            Opts::new("events_consumed_total", "Envelopes received by the consumer"),
            &["event_type", "outcome"],
        )?;
        registry.register(Box::new(events_consumed.clone()))?;

        let handler_failures = IntCounterVec::new(
            Opts::new("event_handler_failures_total", "Handler invocations that returned an error"),
            &["event_type"],
        )?;
        registry.register(Box::new(handler_failures.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Broker circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            cache_lookups,
            cache_write_failures,
            events_published,
            events_consumed,
            handler_failures,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_cache_lookup(&self, kind: &str, key_type: &str, outcome: &str) {
        self.cache_lookups
            .with_label_values(&[kind, key_type, outcome])
            .inc();
    }

    pub fn record_cache_write_failure(&self, kind: &str) {
        self.cache_write_failures.with_label_values(&[kind]).inc();
    }

    pub fn record_publish(&self, event_type: &str, success: bool) {
        let outcome = if success { "ok" } else { OUTCOME_ERROR };
        self.events_published
            .with_label_values(&[event_type, outcome])
            .inc();
    }

    /// `outcome` is "handled", "unhandled" or "malformed"
    pub fn record_consumed(&self, event_type: &str, outcome: &str) {
        self.events_consumed
            .with_label_values(&[event_type, outcome])
            .inc();
    }

    pub fn record_handler_failure(&self, event_type: &str) {
        self.handler_failures.with_label_values(&[event_type]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: i64) {
        self.circuit_breaker_state.set(state);
    }
}
