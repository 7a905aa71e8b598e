//! Session reaper - background sweep that expires lapsed leases
//!
//! The only path by which a crashed client's locks are recovered. It needs
//! nothing from the client: every `interval` it destroys sessions whose
//! `last_renewal_at + ttl` has passed and releases what they held, which
//! promotes the waiters of every affected lock.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::lease::LeaseStore;
use crate::table::LockTable;

pub struct SessionReaper {
    lease: Arc<LeaseStore>,
    table: Arc<LockTable>,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(lease: Arc<LeaseStore>, table: Arc<LockTable>, interval: Duration) -> Self {
        Self {
            lease,
            table,
            interval,
        }
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> usize {
        sweep(&self.lease, &self.table)
    }

    /// Spawn the sweep loop; it stops when `shutdown` fires or its sender is dropped.
    pub fn start(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "Session reaper started");
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep();
                    }
                    _ = shutdown.recv() => {
                        info!("Session reaper stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Destroy every lapsed session and release its locks.
///
/// Each candidate is re-checked at removal time, so a renewal racing with the
/// sweep keeps its session. Returns the number of sessions reaped.
pub fn sweep(lease: &LeaseStore, table: &LockTable) -> usize {
    let now = Instant::now();
    let mut reaped = 0;

    for session_id in lease.expired_sessions(now) {
        let Some(destroyed) = lease.destroy_if_expired(&session_id, now) else {
            continue;
        };
        let released = table.force_release_all(&destroyed);
        if released.is_empty() {
            debug!(session_id = %session_id, "Reaped expired session");
        } else {
            warn!(
                session_id = %session_id,
                locks = ?released,
                "Reaped expired session still holding locks"
            );
        }
        reaped += 1;
    }

    if reaped > 0 {
        counter!("ldlm_sessions_reaped_total").increment(reaped as u64);
        gauge!("ldlm_sessions_active").set(lease.len() as f64);
        gauge!("ldlm_locks_active").set(table.len() as f64);
        gauge!("ldlm_waiters_active").set(table.waiter_count() as f64);
    }
    reaped
}
