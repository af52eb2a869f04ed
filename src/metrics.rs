//! Prometheus metrics collection for orcd.
//!
//! Tracks broker health, fan-out throughput and operation latency, served
//! as Prometheus text on `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total events handed to the hub for fan-out.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref EVENTS_PUBLISHED: IntCounter = IntCounter::new(
        "orc_events_published_total",
        "Events handed to the hub for fan-out"
    ).expect("EVENTS_PUBLISHED metric creation failed");

    /// Total sessions closed for falling behind on their outbound queue.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref SLOW_CONSUMER_CLOSES: IntCounter = IntCounter::new(
        "orc_slow_consumer_closes_total",
        "Sessions closed for outbound queue overflow"
    ).expect("SLOW_CONSUMER_CLOSES metric creation failed");

    /// Total RTM tickets successfully consumed on upgrade.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref TICKETS_CONSUMED: IntCounter = IntCounter::new(
        "orc_tickets_consumed_total",
        "RTM tickets consumed"
    ).expect("TICKETS_CONSUMED metric creation failed");

    /// Error responses by taxonomy code.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref ERRORS_RETURNED: IntCounterVec = IntCounterVec::new(
        Opts::new("orc_errors_total", "Error responses by code"),
        &["code"]
    ).expect("ERRORS_RETURNED metric creation failed");

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently attached realtime sessions.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref OPEN_SESSIONS: IntGauge = IntGauge::new(
        "orc_open_sessions",
        "Attached realtime sessions"
    ).expect("OPEN_SESSIONS metric creation failed");

    /// Rooms created since start.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref ROOMS: IntGauge = IntGauge::new(
        "orc_rooms",
        "Rooms in the entity store"
    ).expect("ROOMS metric creation failed");

    // ========================================================================
    // Histograms
    // ========================================================================

    /// Recipients per published event.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref FANOUT_RECIPIENTS: Histogram = Histogram::with_opts(
        HistogramOpts::new("orc_event_fanout", "Recipients per published event")
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0])
    ).expect("FANOUT_RECIPIENTS metric creation failed");

    /// Operation latency by operation name. Buckets tuned for in-memory
    /// work: 50µs to 500ms.
    // SAFETY: Metrics init at startup via lazy_static, panic acceptable if prometheus fails
    pub static ref OP_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("orc_op_duration_seconds", "Operation latency by name")
            .buckets(vec![0.00005, 0.0002, 0.001, 0.005, 0.02, 0.1, 0.5]),
        &["op"]
    ).expect("OP_DURATION metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Call once at startup. Registration failures are logged and ignored;
/// a broken metric must never take the broker down.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(SLOW_CONSUMER_CLOSES.clone()),
        Box::new(TICKETS_CONSUMED.clone()),
        Box::new(ERRORS_RETURNED.clone()),
        Box::new(OPEN_SESSIONS.clone()),
        Box::new(ROOMS.clone()),
        Box::new(FANOUT_RECIPIENTS.clone()),
        Box::new(OP_DURATION.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::warn!(error = %e, "metric registration failed");
        }
    }
}

/// Record one timed operation.
pub fn record_op(op: &str, seconds: f64) {
    OP_DURATION.with_label_values(&[op]).observe(seconds);
}

/// Gather all metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_register() {
        register_metrics();
        EVENTS_PUBLISHED.inc();
        record_op("post_message", 0.001);
        let text = gather_metrics();
        assert!(text.contains("orc_events_published_total"));
        assert!(text.contains("orc_op_duration_seconds"));
    }

    #[test]
    fn test_register_twice_is_harmless() {
        register_metrics();
        register_metrics();
    }
}
