//! Business metrics for seat allocation.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `enrollment_grants_total{path}` - Grants created (`draw`, `fifo`, `confirm`, `exam_only`)
//! - `enrollment_draws_total{outcome}` - Draws by outcome (`completed`, `resumed`, `failed`)
//! - `enrollment_notifications_total{status}` - Participant mails (`sent`, `failed`)
//! - `enrollment_capacity_rejections_total` - Seat requests refused because the event was full
//! - `enrollment_wish_lists_total{status}` - Submissions (`accepted`, `rejected`)
//!
//! ## Histograms
//! - `enrollment_draw_duration_seconds` - Wall time of one complete draw

use metrics::{describe_counter, describe_histogram};

/// Register all metric descriptions.
///
/// Call once at startup, before anything is recorded.
pub fn register_metrics() {
    describe_counter!(
        "enrollment_grants_total",
        "Total number of grants created by allocation path (draw, fifo, confirm, exam_only)"
    );
    describe_counter!(
        "enrollment_draws_total",
        "Total number of draws by outcome (completed, resumed, failed)"
    );
    describe_histogram!(
        "enrollment_draw_duration_seconds",
        "Time taken to run every lottery round of a draw"
    );
    describe_counter!(
        "enrollment_notifications_total",
        "Total number of participant notifications by status (sent, failed)"
    );
    describe_counter!(
        "enrollment_capacity_rejections_total",
        "Total number of seat requests refused because the event was full"
    );
    describe_counter!(
        "enrollment_wish_lists_total",
        "Total number of wish list submissions by status (accepted, rejected)"
    );

    tracing::info!("Enrollment metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a created grant.
///
/// # Arguments
///
/// * `path` - How the grant came about (`draw`, `fifo`, `confirm`, `exam_only`)
pub fn record_grant(path: &'static str) {
    metrics::counter!("enrollment_grants_total", "path" => path).increment(1);
    tracing::debug!(path, "Recorded grant metric");
}

/// Record a seat request refused for lack of space.
pub fn record_capacity_rejection() {
    metrics::counter!("enrollment_capacity_rejections_total").increment(1);
}

/// Record a finished draw.
///
/// # Arguments
///
/// * `resumed` - Whether the draw continued after an interruption
/// * `duration_secs` - Wall time of the lottery rounds in seconds
pub fn record_draw_completed(resumed: bool, duration_secs: f64) {
    let outcome = if resumed { "resumed" } else { "completed" };
    metrics::counter!("enrollment_draws_total", "outcome" => outcome).increment(1);
    metrics::histogram!("enrollment_draw_duration_seconds").record(duration_secs);
    tracing::debug!(outcome, duration_secs, "Recorded draw metric");
}

/// Record a draw that stopped on an error.
pub fn record_draw_failed() {
    metrics::counter!("enrollment_draws_total", "outcome" => "failed").increment(1);
}

/// Record one participant notification.
pub fn record_notification(sent: bool) {
    let status = if sent { "sent" } else { "failed" };
    metrics::counter!("enrollment_notifications_total", "status" => status).increment(1);
}

/// Record a wish list submission.
pub fn record_wish_list(accepted: bool) {
    let status = if accepted { "accepted" } else { "rejected" };
    metrics::counter!("enrollment_wish_lists_total", "status" => status).increment(1);
}
