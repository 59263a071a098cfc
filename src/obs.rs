//! Prometheus metrics for the report service.
//!
//! Exposes:
//! - `report_run_duration_seconds` (histogram)
//! - `report_runs_total` (counter with status)
//! - `report_runs_inflight` (gauge)
//! - `report_records_skipped_total` (counter with reason)
//! - process metrics via `process` collector

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram, register_int_counter_vec, register_int_gauge, Encoder,
    Histogram, IntCounterVec, IntGauge, TextEncoder,
};
use tracing::warn;

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static RUN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    // Exponential buckets from 100ms up to ~27 minutes.
    let buckets =
        prometheus::exponential_buckets(0.1, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram!(
        "report_run_duration_seconds",
        "Report pipeline run duration in seconds",
        buckets
    )
    .expect("failed to register run duration histogram")
});

static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "report_runs_total",
        "Total report pipeline runs by status",
        &["status"]
    )
    .expect("failed to register run counter")
});

static RUNS_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("report_runs_inflight", "Number of in-flight report runs")
        .expect("failed to register inflight gauge")
});

static RECORDS_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "report_records_skipped_total",
        "Records dropped during extraction by reason",
        &["reason"]
    )
    .expect("failed to register skipped record counter")
});

/// Ensure collectors are registered.
pub fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&RUN_DURATION);
    Lazy::force(&RUNS_TOTAL);
    Lazy::force(&RUNS_INFLIGHT);
    Lazy::force(&RECORDS_SKIPPED);
}

/// Increment the inflight gauge as a pipeline run begins.
pub fn record_run_start() {
    init_collectors();
    RUNS_INFLIGHT.inc();
}

/// Record run completion with duration and status.
pub fn record_run_result(duration: Duration, success: bool) {
    init_collectors();
    RUNS_INFLIGHT.dec();
    RUN_DURATION.observe(duration.as_secs_f64());
    RUNS_TOTAL
        .with_label_values(&[if success { "ok" } else { "error" }])
        .inc();
}

/// Count a record dropped during extraction.
pub fn record_skipped(reason: &'static str) {
    init_collectors();
    RECORDS_SKIPPED.with_label_values(&[reason]).inc();
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> (Vec<u8>, String) {
    init_collectors();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", err);
    }
    (buffer, encoder.format_type().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lifecycle_updates_gauge_and_counters() {
        let ok_before = RUNS_TOTAL.with_label_values(&["ok"]).get();
        let samples_before = {
            init_collectors();
            RUN_DURATION.get_sample_count()
        };

        record_run_start();
        record_run_result(Duration::from_millis(250), true);

        assert_eq!(RUNS_TOTAL.with_label_values(&["ok"]).get(), ok_before + 1);
        assert!(RUN_DURATION.get_sample_count() > samples_before);
    }

    #[test]
    fn failed_runs_counted_separately() {
        let err_before = RUNS_TOTAL.with_label_values(&["error"]).get();

        record_run_start();
        record_run_result(Duration::from_secs(1), false);

        assert_eq!(
            RUNS_TOTAL.with_label_values(&["error"]).get(),
            err_before + 1
        );
    }

    #[test]
    fn skipped_records_counted_by_reason() {
        let before = RECORDS_SKIPPED.with_label_values(&["test_reason"]).get();
        record_skipped("test_reason");
        record_skipped("test_reason");
        assert_eq!(
            RECORDS_SKIPPED.with_label_values(&["test_reason"]).get(),
            before + 2
        );
    }

    #[test]
    fn render_produces_text_format() {
        record_skipped("render_check");
        let (body, content_type) = render();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("report_records_skipped_total"));
        assert!(content_type.contains("text/plain"));
    }

    #[test]
    fn init_collectors_is_idempotent() {
        init_collectors();
        init_collectors();
    }
}
