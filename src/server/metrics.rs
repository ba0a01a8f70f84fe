use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all data catalog metrics
const PREFIX: &str = "data_catalog";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Webhook Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of webhook requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "Webhook request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Audit Metrics
    pub static ref AUDIT_SUBMISSIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_audit_submissions_total"), "Audit applications submitted"),
        &["flow_type", "outcome"]
    ).expect("Failed to create audit_submissions_total metric");

    pub static ref AUDIT_RESULTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_audit_results_total"), "Audit results received from the workflow engine"),
        &["flow_type", "result", "outcome"]
    ).expect("Failed to create audit_results_total metric");

    // Index Sync Metrics
    pub static ref INDEX_MESSAGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_index_messages_total"), "Index messages handed to the delivery channel"),
        &["type", "outcome"]
    ).expect("Failed to create index_messages_total metric");

    pub static ref INDEX_ACKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_index_acks_total"), "Index delivery acknowledgements processed"),
        &["outcome"]
    ).expect("Failed to create index_acks_total metric");

    pub static ref INDEX_DELIVERY_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_index_delivery_duration_seconds"),
            "Time spent delivering one index message"
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create index_delivery_duration_seconds metric");

    pub static ref RECONCILE_CATALOGS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_reconcile_catalogs_total"), "Catalogs seen by index reconciliation"),
        &["outcome"]
    ).expect("Failed to create reconcile_catalogs_total metric");

    // Download Metrics
    pub static ref DOWNLOAD_APPLICATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_download_applications_total"), "Download application events"),
        &["event"]
    ).expect("Failed to create download_applications_total metric");

    pub static ref DOWNLOAD_GRANTS_EXPIRED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_download_grants_expired_total"),
        "Download grants deactivated by the expiry sweep"
    ).expect("Failed to create download_grants_expired_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");
}

/// Register all metrics with the global registry.
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(AUDIT_SUBMISSIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(AUDIT_RESULTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INDEX_MESSAGES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INDEX_ACKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INDEX_DELIVERY_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(RECONCILE_CATALOGS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOAD_APPLICATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOAD_GRANTS_EXPIRED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Outcome is one of `accepted`, `conflict`, `not_found`, `error`.
pub fn record_audit_submission(flow_type: &str, outcome: &str) {
    AUDIT_SUBMISSIONS_TOTAL
        .with_label_values(&[flow_type, outcome])
        .inc();
}

/// Outcome is `applied` or `ignored` (replays and stale results).
pub fn record_audit_result(flow_type: &str, result: &str, outcome: &str) {
    AUDIT_RESULTS_TOTAL
        .with_label_values(&[flow_type, result, outcome])
        .inc();
}

pub fn record_index_message(msg_type: &str, outcome: &str) {
    INDEX_MESSAGES_TOTAL
        .with_label_values(&[msg_type, outcome])
        .inc();
}

pub fn record_index_ack(outcome: &str) {
    INDEX_ACKS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_index_delivery(duration: Duration) {
    INDEX_DELIVERY_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_reconcile(found: usize, published: usize, failed: usize) {
    RECONCILE_CATALOGS_TOTAL
        .with_label_values(&["found"])
        .inc_by(found as f64);
    RECONCILE_CATALOGS_TOTAL
        .with_label_values(&["published"])
        .inc_by(published as f64);
    RECONCILE_CATALOGS_TOTAL
        .with_label_values(&["failed"])
        .inc_by(failed as f64);
}

pub fn record_download_application(event: &str) {
    DOWNLOAD_APPLICATIONS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_grants_expired(count: usize) {
    DOWNLOAD_GRANTS_EXPIRED_TOTAL.inc_by(count as f64);
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_metric(name: &str) -> bool {
        REGISTRY.gather().iter().any(|m| m.get_name() == name)
    }

    #[test]
    fn test_metrics_initialization() {
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_audit_metrics_recorded() {
        init_metrics();

        record_audit_submission("online", "accepted");
        record_audit_result("online", "pass", "applied");

        assert!(has_metric("data_catalog_audit_submissions_total"));
        assert!(has_metric("data_catalog_audit_results_total"));
    }

    #[test]
    fn test_reconcile_metrics_recorded() {
        init_metrics();

        record_reconcile(3, 2, 1);

        let failed = RECONCILE_CATALOGS_TOTAL
            .with_label_values(&["failed"])
            .get();
        assert!(failed >= 1.0);
    }
}
