//! Metric recording for the scraping pipeline.
//!
//! Thin wrappers over the `metrics` facade; the Prometheus recorder is
//! installed once at startup and `GET /metrics` renders its handle.

use crate::error::ErrorKind;
use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub fn install_prometheus() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    ::metrics::set_boxed_recorder(Box::new(recorder))?;
    Ok(handle)
}

pub fn record_scrape_completed(duration: Duration) {
    counter!("scrapes_completed_total", 1);
    histogram!("scrape_duration_seconds", duration.as_secs_f64());
}

pub fn record_scrape_failed(kind: ErrorKind) {
    counter!("scrapes_failed_total", 1, "kind" => kind.as_str());
}

pub fn record_retry() {
    counter!("scrape_retries_total", 1);
}

pub fn record_item_skipped() {
    counter!("items_skipped_total", 1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!("queue_depth", depth as f64);
}

pub fn set_rate_limit_delay(delay: Duration) {
    gauge!("rate_limit_delay_ms", delay.as_millis() as f64);
}

pub fn set_browsers_available(count: usize) {
    gauge!("browsers_available", count as f64);
}

pub fn record_session_paused() {
    counter!("sessions_paused_total", 1);
}
