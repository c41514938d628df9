/*!
 * # Metrics Module
 *
 * Prometheus counters for the fulfillment pipeline, registered in a
 * crate-local registry and rendered in text exposition format at `/metrics`.
 */

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref FULFILLMENT_SUBMISSIONS: IntCounter = IntCounter::new(
        "fulfillment_submissions_total",
        "Orders accepted by the fulfillment vendor"
    )
    .expect("metric can be created");
    pub static ref FULFILLMENT_DEFERRALS: IntCounter = IntCounter::new(
        "fulfillment_deferrals_total",
        "Orders deferred by the funding gate"
    )
    .expect("metric can be created");
    pub static ref FULFILLMENT_ATTENTION: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "fulfillment_requires_attention_total",
            "Orders parked for operator attention"
        ),
        &["reason"]
    )
    .expect("metric can be created");
    pub static ref FULFILLMENT_FAILURES: IntCounter = IntCounter::new(
        "fulfillment_failures_total",
        "Orders marked failed after an internal error"
    )
    .expect("metric can be created");
    pub static ref FULFILLMENT_RATE_LIMITED: IntCounter = IntCounter::new(
        "fulfillment_rate_limited_total",
        "Fulfillment attempts blocked by the per-user rate limit"
    )
    .expect("metric can be created");
    pub static ref FUNDING_FAIL_OPEN: IntCounter = IntCounter::new(
        "funding_gate_fail_open_total",
        "Orders that proceeded without a known pool balance"
    )
    .expect("metric can be created");
    pub static ref VENDOR_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("vendor_errors_total", "Vendor API call failures"),
        &["kind"]
    )
    .expect("metric can be created");
    pub static ref VENDOR_WEBHOOK_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("vendor_webhook_events_total", "Inbound vendor webhook events"),
        &["event"]
    )
    .expect("metric can be created");
    pub static ref REGISTRY: Registry = build_registry();
}

fn build_registry() -> Registry {
    let registry = Registry::new();
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(FULFILLMENT_SUBMISSIONS.clone()),
        Box::new(FULFILLMENT_DEFERRALS.clone()),
        Box::new(FULFILLMENT_ATTENTION.clone()),
        Box::new(FULFILLMENT_FAILURES.clone()),
        Box::new(FULFILLMENT_RATE_LIMITED.clone()),
        Box::new(FUNDING_FAIL_OPEN.clone()),
        Box::new(VENDOR_ERRORS.clone()),
        Box::new(VENDOR_WEBHOOK_EVENTS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("Failed to register metric: {}", e);
        }
    }
    registry
}

/// Renders every registered metric in Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
