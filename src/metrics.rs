//! Metrics with Prometheus
//!
//! Exposes key operational metrics for monitoring:
//! - Store and query rates and latencies
//! - CARE pool balance
//! - Memory engine ingest, phase transitions and generations
//!
//! Collectors are always updated; they are only exported once
//! [`register_metrics`] has added them to [`METRICS_REGISTRY`].

use lazy_static::lazy_static;
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Attribute Store Metrics
    // ============================================================================

    /// Store operations
    pub static ref STORE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hypercube_store_total", "Total store operations"),
        &["result"]
    ).unwrap();

    /// Query duration
    pub static ref QUERY_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "hypercube_query_duration_seconds",
            "Attribute query duration"
        )
        .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 9.0])
    ).unwrap();

    /// Results returned per query
    pub static ref QUERY_RESULTS: Histogram = Histogram::with_opts(
        HistogramOpts::new("hypercube_query_results", "Records returned per query")
            .buckets(vec![0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 1000.0, 10000.0])
    ).unwrap();

    /// Queries that exceeded the latency budget
    pub static ref QUERY_SLA_BREACHES: IntCounter = IntCounter::new(
        "hypercube_query_sla_breaches_total",
        "Queries slower than the configured latency budget"
    ).unwrap();

    /// CARE pool balance
    pub static ref CARE_POOL: Gauge = Gauge::new(
        "hypercube_care_pool",
        "Current CARE pool balance"
    ).unwrap();

    // ============================================================================
    // Memory Engine Metrics
    // ============================================================================

    /// Ingest operations
    pub static ref INGEST_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("hypercube_ingest_total", "Total ingest operations"),
        &["result"]
    ).unwrap();

    /// Phase transitions, labelled by the phase entered
    pub static ref CYCLE_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("hypercube_cycle_transitions_total", "Memories advanced per phase"),
        &["phase"]
    ).unwrap();

    /// Generation snapshots created
    pub static ref GENERATIONS_TOTAL: IntCounter = IntCounter::new(
        "hypercube_generations_total",
        "Generation snapshots created"
    ).unwrap();
}

/// Register all metrics with the registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(STORE_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(QUERY_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(QUERY_RESULTS.clone()))?;
    METRICS_REGISTRY.register(Box::new(QUERY_SLA_BREACHES.clone()))?;
    METRICS_REGISTRY.register(Box::new(CARE_POOL.clone()))?;

    METRICS_REGISTRY.register(Box::new(INGEST_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(CYCLE_TRANSITIONS.clone()))?;
    METRICS_REGISTRY.register(Box::new(GENERATIONS_TOTAL.clone()))?;

    Ok(())
}

/// Render registered metrics in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        register_metrics().unwrap();
        STORE_TOTAL.with_label_values(&["ok"]).inc();
        let text = gather_text().unwrap();
        assert!(text.contains("hypercube_store_total"));
    }
}
