/// Metrics for the credential service
///
/// Prometheus counters and gauges covering:
/// - HTTP request counts and latencies
/// - Login outcomes and rate-limit rejections
/// - One-time codes, invitations and account lifecycle
/// - Background job execution

use crate::error::{AuthError, AuthResult};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder,
    Gauge, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Credential Metrics ==========

    /// Login attempts by outcome
    pub static ref LOGIN_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "login_attempts_total",
        "Total number of login attempts",
        &["outcome"]
    )
    .unwrap();

    /// One-time codes issued by purpose
    pub static ref ONE_TIME_CODES_ISSUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "one_time_codes_issued_total",
        "Total number of one-time codes issued",
        &["purpose"]
    )
    .unwrap();

    /// Password resets completed or rejected
    pub static ref PASSWORD_RESETS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "password_resets_total",
        "Total number of password reset completions",
        &["status"]
    )
    .unwrap();

    /// Requests rejected by the attempt limiter
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rate_limited_total",
        "Total number of rate-limited attempts",
        &["action"]
    )
    .unwrap();

    // ========== Account Metrics ==========

    /// Account creations by source
    pub static ref ACCOUNT_CREATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "account_creations_total",
        "Total number of accounts created",
        &["source"]
    )
    .unwrap();

    /// Invitation codes redeemed
    pub static ref INVITES_REDEEMED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "invites_redeemed_total",
        "Total number of invitation redemptions",
        &["status"]
    )
    .unwrap();

    /// Total accounts
    pub static ref ACCOUNTS_TOTAL: IntGauge = register_int_gauge!(
        "accounts_total",
        "Total number of accounts"
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Rows removed by cleanup jobs
    pub static ref EXPIRED_ROWS_PURGED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "expired_rows_purged_total",
        "Total number of expired sessions and codes purged",
        &["kind"]
    )
    .unwrap();

    /// Service uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "uptime_seconds",
        "Service uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> AuthResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AuthError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| AuthError::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a login attempt (`success`, `reset_required`, `failure`, `no_roles`)
pub fn record_login(outcome: &str) {
    LOGIN_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record an issued one-time code
pub fn record_code_issued(purpose: &str) {
    ONE_TIME_CODES_ISSUED_TOTAL
        .with_label_values(&[purpose])
        .inc();
}

/// Record a reset completion attempt
pub fn record_password_reset(success: bool) {
    PASSWORD_RESETS_TOTAL
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
}

/// Record a rate-limited attempt
pub fn record_rate_limited(action: &str) {
    RATE_LIMITED_TOTAL.with_label_values(&[action]).inc();
}

/// Record an account creation
pub fn record_account_creation(source: &str) {
    ACCOUNT_CREATIONS_TOTAL.with_label_values(&[source]).inc();
    ACCOUNTS_TOTAL.inc();
}

/// Record an account removal
pub fn record_account_removal() {
    ACCOUNTS_TOTAL.dec();
}

/// Record an invitation redemption
pub fn record_invite_redeemed(success: bool) {
    INVITES_REDEEMED_TOTAL
        .with_label_values(&[if success { "success" } else { "failure" }])
        .inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}

/// Record rows removed by a cleanup pass
pub fn record_purged(kind: &str, count: u64) {
    EXPIRED_ROWS_PURGED_TOTAL
        .with_label_values(&[kind])
        .inc_by(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("POST", "/api/session", 200, 0.05);
        let metrics = render_metrics().unwrap();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_login() {
        record_login("success");
        record_login("failure");
        let metrics = render_metrics().unwrap();
        assert!(metrics.contains("login_attempts_total"));
        assert!(metrics.contains("outcome=\"failure\""));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("cleanup", "success");
        record_purged("session", 3);
        let metrics = render_metrics().unwrap();
        assert!(metrics.contains("background_jobs_total"));
        assert!(metrics.contains("expired_rows_purged_total"));
    }

    #[test]
    fn test_metrics_rendering() {
        record_account_creation("invite");
        record_invite_redeemed(true);
        record_code_issued("reset");

        let metrics = render_metrics().unwrap();

        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("# TYPE"));
        assert!(metrics.contains("account_creations_total"));
        assert!(metrics.contains("invites_redeemed_total"));
        assert!(metrics.contains("one_time_codes_issued_total"));
    }
}
