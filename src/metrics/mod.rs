use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::utils::CircuitState;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Ingestion throughput, latency and rejections by reason
// - Cache size and hydration result
// - Query outcomes
// - Dead-letter publishing and its circuit breaker
//
// All metrics are registered with one Registry and scraped via GET /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Ingestion
    pub orders_ingested: IntCounter,
    pub messages_rejected: IntCounterVec,
    pub ingest_duration: Histogram,

    // Cache
    pub cache_orders: IntGauge,
    pub hydrated_orders: IntGauge,

    // Queries
    pub query_requests: IntCounterVec,

    // Dead letters
    pub dead_letters: IntCounterVec,
    pub retry_attempts: IntCounterVec,
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let orders_ingested = IntCounter::new(
            "orders_ingested_total",
            "Orders persisted and cached from the message feed",
        )?;
        registry.register(Box::new(orders_ingested.clone()))?;

        let messages_rejected = IntCounterVec::new(
            Opts::new("messages_rejected_total", "Inbound messages rejected by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(messages_rejected.clone()))?;

        let ingest_duration = Histogram::with_opts(
            HistogramOpts::new("ingest_duration_seconds", "Time from receipt to cache update")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(ingest_duration.clone()))?;

        let cache_orders = IntGauge::new("cache_orders", "Orders currently held in the cache")?;
        registry.register(Box::new(cache_orders.clone()))?;

        let hydrated_orders = IntGauge::new(
            "cache_hydrated_orders",
            "Orders loaded from the store at startup",
        )?;
        registry.register(Box::new(hydrated_orders.clone()))?;

        let query_requests = IntCounterVec::new(
            Opts::new("order_queries_total", "Order lookups by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(query_requests.clone()))?;

        let dead_letters = IntCounterVec::new(
            Opts::new("dead_letters_total", "Rejected payloads sent to the dead-letter topic"),
            &["outcome"],
        )?;
        registry.register(Box::new(dead_letters.clone()))?;

        let retry_attempts = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Retried attempts by operation"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_attempts.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Dead-letter producer circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_ingested,
            messages_rejected,
            ingest_duration,
            cache_orders,
            hydrated_orders,
            query_requests,
            dead_letters,
            retry_attempts,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_ingested(&self, duration_secs: f64) {
        self.orders_ingested.inc();
        self.ingest_duration.observe(duration_secs);
    }

    pub fn record_rejected(&self, reason: &str) {
        self.messages_rejected.with_label_values(&[reason]).inc();
    }

    pub fn set_cache_size(&self, orders: usize) {
        self.cache_orders.set(orders as i64);
    }

    pub fn record_hydration(&self, loaded: usize) {
        self.hydrated_orders.set(loaded as i64);
    }

    /// `outcome` is one of found, not_found, unavailable
    pub fn record_query(&self, outcome: &str) {
        self.query_requests.with_label_values(&[outcome]).inc();
    }

    pub fn record_dead_letter(&self, published: bool) {
        let outcome = if published { "published" } else { "failed" };
        self.dead_letters.with_label_values(&[outcome]).inc();
    }

    pub fn record_retry_attempt(&self, operation: &str) {
        self.retry_attempts.with_label_values(&[operation]).inc();
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        self.circuit_breaker_state.set(value);
    }
}
