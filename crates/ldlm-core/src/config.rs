//! Lock manager options
//!
//! Typed projection of the `ldlm.*` configuration keys consumed by the core.
//! The server builds one from its configuration layer and injects it.

use std::time::Duration;

pub const DEFAULT_TTL_MS: u64 = 10_000;
pub const DEFAULT_MAX_TTL_MS: u64 = 3_600_000;
pub const DEFAULT_REAPER_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MAX_WAIT_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_MAX_SESSIONS: usize = 100_000;
pub const DEFAULT_MAX_LOCKS: usize = 1_000_000;

#[derive(Debug, Clone)]
pub struct LockManagerOptions {
    /// TTL for sessions created without one (including implicit sessions)
    pub default_ttl: Duration,
    /// Upper clamp for requested TTLs
    pub max_ttl: Duration,
    /// Session reaper sweep interval
    pub reaper_interval: Duration,
    /// Upper clamp for acquire wait timeouts
    pub max_wait_timeout: Duration,
    /// Lease store capacity
    pub max_sessions: usize,
    /// Lock table capacity (distinct names)
    pub max_locks: usize,
    /// Grant adjacent shared waiters at the queue head together.
    /// When false, queued requests are granted strictly one at a time.
    pub shared_batching: bool,
}

impl Default for LockManagerOptions {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(DEFAULT_TTL_MS),
            max_ttl: Duration::from_millis(DEFAULT_MAX_TTL_MS),
            reaper_interval: Duration::from_millis(DEFAULT_REAPER_INTERVAL_MS),
            max_wait_timeout: Duration::from_millis(DEFAULT_MAX_WAIT_TIMEOUT_MS),
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_locks: DEFAULT_MAX_LOCKS,
            shared_batching: true,
        }
    }
}

impl LockManagerOptions {
    /// Resolve a client-requested TTL: default when absent, clamped to `[1ms, max_ttl]`.
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_ttl)
            .clamp(Duration::from_millis(1), self.max_ttl)
    }

    /// Clamp a client-requested wait timeout to `max_wait_timeout`.
    pub fn effective_wait(&self, requested: Duration) -> Duration {
        requested.min(self.max_wait_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LockManagerOptions::default();
        assert_eq!(options.default_ttl, Duration::from_secs(10));
        assert_eq!(options.reaper_interval, Duration::from_secs(1));
        assert!(options.shared_batching);
    }

    #[test]
    fn test_effective_ttl() {
        let options = LockManagerOptions::default();
        assert_eq!(options.effective_ttl(None), options.default_ttl);
        assert_eq!(
            options.effective_ttl(Some(Duration::ZERO)),
            Duration::from_millis(1)
        );
        assert_eq!(
            options.effective_ttl(Some(Duration::from_secs(7200))),
            options.max_ttl
        );
    }

    #[test]
    fn test_effective_wait() {
        let options = LockManagerOptions {
            max_wait_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(
            options.effective_wait(Duration::from_secs(60)),
            Duration::from_secs(5)
        );
        assert_eq!(options.effective_wait(Duration::ZERO), Duration::ZERO);
    }
}
