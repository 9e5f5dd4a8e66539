// Prometheus metrics for the admission gate
//
// Exposed on the /metrics endpoint when the metrics server is enabled:
// - Admissions granted and cancelled (counters)
// - Refills and metadata merges (counters)
// - Queue depth and remaining capacity (gauges)
// - Time spent waiting for admission (histogram)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref ADMISSIONS_GRANTED_TOTAL: IntCounter = IntCounter::new(
        "quotagate_admissions_granted_total",
        "Total number of requests admitted"
    ).expect("Failed to create admissions granted metric");

    pub static ref ADMISSIONS_CANCELLED_TOTAL: IntCounter = IntCounter::new(
        "quotagate_admissions_cancelled_total",
        "Total number of queued requests abandoned before admission"
    ).expect("Failed to create admissions cancelled metric");

    pub static ref REFILLS_TOTAL: IntCounter = IntCounter::new(
        "quotagate_refills_total",
        "Total number of quota refills performed by the wake timer"
    ).expect("Failed to create refills metric");

    pub static ref METADATA_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("quotagate_metadata_updates_total", "Quota metadata observed on responses"),
        &["outcome"]
    ).expect("Failed to create metadata updates metric");

    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "quotagate_queue_depth",
        "Number of requests waiting for admission"
    ).expect("Failed to create queue depth metric");

    pub static ref QUOTA_REMAINING: IntGauge = IntGauge::new(
        "quotagate_quota_remaining",
        "Requests admittable without waiting"
    ).expect("Failed to create quota remaining metric");

    pub static ref ADMISSION_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("quotagate_admission_wait_seconds", "Time from enqueue to admission"),
    ).expect("Failed to create admission wait metric");
}

/// Register all metrics with the registry
///
/// Safe to call more than once; already-registered collectors are skipped.
pub fn init() -> prometheus::Result<()> {
    register(Box::new(ADMISSIONS_GRANTED_TOTAL.clone()))?;
    register(Box::new(ADMISSIONS_CANCELLED_TOTAL.clone()))?;
    register(Box::new(REFILLS_TOTAL.clone()))?;
    register(Box::new(METADATA_UPDATES_TOTAL.clone()))?;
    register(Box::new(QUEUE_DEPTH.clone()))?;
    register(Box::new(QUOTA_REMAINING.clone()))?;
    register(Box::new(ADMISSION_WAIT_SECONDS.clone()))?;
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
