use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, GaugeVec, Histogram, register_counter, register_counter_vec,
    register_gauge_vec, register_histogram,
};

use crate::rate_limit::StoreStats;

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gitea_limit_requests_total", "Total number of gated requests").unwrap();
    // outcome: trusted | verified | anonymous | limited
    pub static ref DECISIONS: CounterVec = register_counter_vec!(
        "gitea_limit_decisions_total",
        "Admission decisions by outcome",
        &["outcome"]
    )
    .unwrap();
    // result: verified | rejected | error | throttled
    pub static ref VERIFICATIONS: CounterVec = register_counter_vec!(
        "gitea_limit_verifications_total",
        "Gitea verification attempts by result",
        &["result"]
    )
    .unwrap();
    pub static ref VERIFY_LATENCY: Histogram = register_histogram!(
        "gitea_limit_verify_latency_seconds",
        "Latency of Gitea verification calls in seconds"
    )
    .unwrap();
    pub static ref TRACKED_IPS: GaugeVec = register_gauge_vec!(
        "gitea_limit_tracked_ips",
        "IPs currently held per state table",
        &["table"]
    )
    .unwrap();
}

pub fn record_tracked(stats: &StoreStats) {
    TRACKED_IPS
        .with_label_values(&["anonymous"])
        .set(stats.anonymous as f64);
    TRACKED_IPS
        .with_label_values(&["trusted"])
        .set(stats.trusted as f64);
    TRACKED_IPS
        .with_label_values(&["cooldown"])
        .set(stats.cooling as f64);
}
