//! Prometheus metrics for docket queues.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `docket_documents_pushed_total` - Documents pushed, by result (created, skipped)
//! - `docket_documents_picked_total` - Documents handed out by picks
//! - `docket_resolutions_total` - Resolutions by action and resulting status
//! - `docket_maintenance_affected_total` - Documents moved by maintenance
//!
//! ## Gauges
//! - `docket_queue_documents` - Documents per queue and status at the last stats call
//!
//! ## Histograms
//! - `docket_handler_duration_seconds` - Handler execution time
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Registry holding every docket collector.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `queue`, `result` (created, skipped).
pub static DOCUMENTS_PUSHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("docket_documents_pushed_total", "Total number of documents pushed");
    CounterVec::new(opts, &["queue", "result"])
        .expect("docket_documents_pushed_total metric creation failed")
});

/// Labels: `queue`.
pub static DOCUMENTS_PICKED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("docket_documents_picked_total", "Total number of documents picked");
    CounterVec::new(opts, &["queue"]).expect("docket_documents_picked_total metric creation failed")
});

/// Labels: `queue`, `action`, `status`.
pub static RESOLUTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("docket_resolutions_total", "Total number of document resolutions");
    CounterVec::new(opts, &["queue", "action", "status"])
        .expect("docket_resolutions_total metric creation failed")
});

/// Labels: `queue`, `operation`.
pub static MAINTENANCE_AFFECTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "docket_maintenance_affected_total",
        "Total number of documents moved by maintenance",
    );
    CounterVec::new(opts, &["queue", "operation"])
        .expect("docket_maintenance_affected_total metric creation failed")
});

/// Labels: `queue`, `status`.
pub static QUEUE_DOCUMENTS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("docket_queue_documents", "Documents stored per queue and status");
    GaugeVec::new(opts, &["queue", "status"]).expect("docket_queue_documents metric creation failed")
});

/// Labels: `queue`, `action`.
pub static HANDLER_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "docket_handler_duration_seconds",
        "Handler execution duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["queue", "action"])
        .expect("docket_handler_duration_seconds metric creation failed")
});

/// Register every collector with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(DOCUMENTS_PUSHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(DOCUMENTS_PICKED_TOTAL.clone()),
        Box::new(RESOLUTIONS_TOTAL.clone()),
        Box::new(MAINTENANCE_AFFECTED_TOTAL.clone()),
        Box::new(QUEUE_DOCUMENTS.clone()),
        Box::new(HANDLER_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_pushed(queue: &str, created: u64, skipped: u64) {
    DOCUMENTS_PUSHED_TOTAL
        .with_label_values(&[queue, "created"])
        .inc_by(created as f64);
    DOCUMENTS_PUSHED_TOTAL
        .with_label_values(&[queue, "skipped"])
        .inc_by(skipped as f64);
}

pub fn record_picked(queue: &str, count: u64) {
    DOCUMENTS_PICKED_TOTAL
        .with_label_values(&[queue])
        .inc_by(count as f64);
}

pub fn record_resolved(queue: &str, action: &str, status: &str) {
    RESOLUTIONS_TOTAL
        .with_label_values(&[queue, action, status])
        .inc();
}

pub fn record_maintenance(queue: &str, operation: &str, affected: u64) {
    MAINTENANCE_AFFECTED_TOTAL
        .with_label_values(&[queue, operation])
        .inc_by(affected as f64);
}

pub fn set_queue_documents(queue: &str, status: &str, count: f64) {
    QUEUE_DOCUMENTS
        .with_label_values(&[queue, status])
        .set(count);
}

pub fn observe_handler_duration(queue: &str, action: &str, duration_secs: f64) {
    HANDLER_DURATION_SECONDS
        .with_label_values(&[queue, action])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization_is_idempotent() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should succeed");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_pushed("metrics_q", 2, 1);
        record_picked("metrics_q", 2);
        record_resolved("metrics_q", "complete", "completed");
        record_maintenance("metrics_q", "make_pending", 3);
        set_queue_documents("metrics_q", "pending", 4.0);
        observe_handler_duration("metrics_q", "complete", 0.25);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("docket_documents_pushed_total"));
        assert!(output.contains("docket_resolutions_total"));
        assert!(output.contains("docket_queue_documents"));
        assert!(output.contains("docket_handler_duration_seconds"));
    }
}
