// Metrics for the lock manager
// Counters are recorded inside ldlm-core; this module only describes them
// and refreshes the state gauges from a stats sample.

use metrics::{describe_counter, describe_gauge, gauge};

use ldlm_common::model::Stats;

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(
        "ldlm_acquire_total",
        "Total number of acquire requests by mode and outcome status"
    );
    describe_counter!(
        "ldlm_unlock_total",
        "Total number of unlock requests by outcome status"
    );
    describe_counter!(
        "ldlm_sessions_reaped_total",
        "Total number of sessions destroyed by the reaper after their lease lapsed"
    );
    describe_gauge!("ldlm_sessions_active", "Current number of live sessions");
    describe_gauge!("ldlm_locks_active", "Current number of lock names with holders or waiters");
    describe_gauge!("ldlm_waiters_active", "Current number of queued acquire requests");

    tracing::info!("Metrics initialized");
}

/// Refresh the state gauges
pub fn record_stats(stats: &Stats) {
    gauge!("ldlm_sessions_active").set(stats.sessions as f64);
    gauge!("ldlm_locks_active").set(stats.locks as f64);
    gauge!("ldlm_waiters_active").set(stats.waiters as f64);
}
