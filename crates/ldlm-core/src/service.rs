//! Lock service core
//!
//! Transport-agnostic entry point: validates sessions against the lease store,
//! runs acquire/unlock against the lock table, and suspends blocked acquires
//! on the wait queue scheduler.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tracing::{debug, info};

use ldlm_common::model::{LockInfo, SessionInfo, Stats};
use ldlm_common::validation::{check, validate_lock_name, validate_session_id};
use ldlm_common::{LdlmError, LockMode, Result, SessionId};

use crate::config::LockManagerOptions;
use crate::lease::LeaseStore;
use crate::reaper::{self, SessionReaper};
use crate::scheduler::WaitTicket;
use crate::table::{Admission, LockTable};

/// A granted lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub name: String,
    pub session_id: SessionId,
    pub mode: LockMode,
}

pub struct LockService {
    lease: Arc<LeaseStore>,
    table: Arc<LockTable>,
    options: LockManagerOptions,
}

impl LockService {
    pub fn new(options: LockManagerOptions) -> Self {
        let lease = Arc::new(LeaseStore::new(options.max_sessions));
        let table = Arc::new(LockTable::new(
            lease.clone(),
            options.max_locks,
            options.shared_batching,
        ));
        Self::with_parts(lease, table, options)
    }

    /// Assemble a service from explicitly constructed stores.
    pub fn with_parts(
        lease: Arc<LeaseStore>,
        table: Arc<LockTable>,
        options: LockManagerOptions,
    ) -> Self {
        Self {
            lease,
            table,
            options,
        }
    }

    pub fn options(&self) -> &LockManagerOptions {
        &self.options
    }

    pub fn lease_store(&self) -> &Arc<LeaseStore> {
        &self.lease
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.table
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open a session. `ttl` defaults to the configured TTL and is clamped.
    pub fn create_session(&self, ttl: Option<Duration>) -> Result<SessionId> {
        let session_id = self.lease.create_session(self.options.effective_ttl(ttl))?;
        self.record_gauges();
        Ok(session_id)
    }

    /// Reset a session's lease; `ttl` of `None` keeps the current TTL.
    pub fn renew(&self, session_id: &str, ttl: Option<Duration>) -> Result<()> {
        check(validate_session_id(session_id))
            .map_err(|_| LdlmError::InvalidSession(session_id.to_string()))?;
        let ttl = ttl.map(|ttl| self.options.effective_ttl(Some(ttl)));
        self.lease.renew(session_id, ttl).inspect_err(|_| {
            self.expire_if_lapsed(session_id);
        })
    }

    /// Keepalive: renew with the session's current TTL.
    pub fn heartbeat(&self, session_id: &str) -> Result<()> {
        self.renew(session_id, None)
    }

    /// Explicit logout. Idempotent; returns the names the session held.
    pub fn destroy_session(&self, session_id: &str) -> Vec<String> {
        let Some(destroyed) = self.lease.destroy(session_id) else {
            return Vec::new();
        };
        let released = self.table.force_release_all(&destroyed);
        self.record_gauges();
        info!(session_id = %session_id, released = released.len(), "Session destroyed");
        released
    }

    /// Destroy every lapsed session and release its locks.
    ///
    /// Returns the number of sessions reaped.
    pub fn reap_expired(&self) -> usize {
        reaper::sweep(&self.lease, &self.table)
    }

    /// Background reaper over this service's stores.
    pub fn reaper(&self) -> SessionReaper {
        SessionReaper::new(
            self.lease.clone(),
            self.table.clone(),
            self.options.reaper_interval,
        )
    }

    fn expire_if_lapsed(&self, session_id: &str) {
        let now = tokio::time::Instant::now();
        if let Some(destroyed) = self.lease.destroy_if_expired(session_id, now) {
            let released = self.table.force_release_all(&destroyed);
            debug!(session_id = %session_id, released = released.len(), "Expired lapsed session on access");
            self.record_gauges();
        }
    }

    fn record_gauges(&self) {
        gauge!("ldlm_sessions_active").set(self.lease.len() as f64);
        gauge!("ldlm_locks_active").set(self.table.len() as f64);
        gauge!("ldlm_waiters_active").set(self.table.waiter_count() as f64);
    }

    // ========================================================================
    // Locks
    // ========================================================================

    /// Acquire `name` in `mode`, waiting up to `wait_timeout` (zero = try once).
    ///
    /// Without a session id an implicit session is created. Its lease covers
    /// the whole wait, and the default TTL starts counting once the lock is
    /// granted; it is discarded again if the lock is not obtained.
    pub async fn acquire(
        &self,
        session_id: Option<&str>,
        name: &str,
        mode: LockMode,
        wait_timeout: Duration,
    ) -> Result<LockHandle> {
        check(validate_lock_name(name))?;

        let (session_id, implicit) = match session_id {
            Some(id) => {
                check(validate_session_id(id))
                    .map_err(|_| LdlmError::InvalidSession(id.to_string()))?;
                (id.to_string(), false)
            }
            None => {
                let wait = self.options.effective_wait(wait_timeout);
                let session_id = self
                    .lease
                    .create_session(self.options.effective_ttl(None) + wait)?;
                (session_id, true)
            }
        };

        let result = self.acquire_for(&session_id, name, mode, wait_timeout).await;
        record_acquire(mode, &result);

        let result = match result {
            Ok(()) if implicit => self
                .lease
                .renew(&session_id, Some(self.options.effective_ttl(None))),
            other => other,
        };
        self.record_gauges();

        match result {
            Ok(()) => Ok(LockHandle {
                name: name.to_string(),
                session_id,
                mode,
            }),
            Err(e) => {
                if implicit {
                    self.destroy_session(&session_id);
                } else if matches!(e, LdlmError::InvalidSession(_)) {
                    self.expire_if_lapsed(&session_id);
                }
                Err(e)
            }
        }
    }

    async fn acquire_for(
        &self,
        session_id: &str,
        name: &str,
        mode: LockMode,
        wait_timeout: Duration,
    ) -> Result<()> {
        let wait = self.options.effective_wait(wait_timeout);

        if wait.is_zero() {
            return match self.table.try_acquire(name, session_id, mode)? {
                Admission::Granted => Ok(()),
                Admission::Blocked | Admission::Queued { .. } => Err(LdlmError::Timeout {
                    name: name.to_string(),
                    waited_ms: 0,
                }),
            };
        }

        match self.table.acquire_or_enqueue(name, session_id, mode, wait)? {
            Admission::Granted => Ok(()),
            Admission::Blocked => Err(LdlmError::Timeout {
                name: name.to_string(),
                waited_ms: 0,
            }),
            Admission::Queued { id, rx } => {
                gauge!("ldlm_waiters_active").set(self.table.waiter_count() as f64);
                let ticket = WaitTicket::new(
                    self.table.clone(),
                    name.to_string(),
                    session_id.to_string(),
                    id,
                    rx,
                );
                ticket.wait(wait).await
            }
        }
    }

    /// Release `name` held by `session_id`.
    ///
    /// Unlocking a name the session does not hold is a benign `NotHeld`; an
    /// unknown or lapsed session is `InvalidSession`.
    pub fn unlock(&self, session_id: &str, name: &str) -> Result<()> {
        check(validate_lock_name(name))?;
        let result = if self.lease.touch(session_id) {
            self.table.release(name, session_id)
        } else {
            self.expire_if_lapsed(session_id);
            Err(LdlmError::InvalidSession(session_id.to_string()))
        };
        let status = match &result {
            Ok(()) => "OK",
            Err(e) => e.status().map(|s| s.as_str()).unwrap_or("ERROR"),
        };
        counter!("ldlm_unlock_total", "status" => status).increment(1);
        self.record_gauges();
        result
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn lock_info(&self, name: &str) -> Option<LockInfo> {
        self.table.info(name)
    }

    pub fn list_locks(&self) -> Vec<LockInfo> {
        self.table.list()
    }

    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.lease.info(session_id)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            sessions: self.lease.len(),
            locks: self.table.len(),
            waiters: self.table.waiter_count(),
        }
    }
}

fn record_acquire(mode: LockMode, result: &Result<()>) {
    let status = match result {
        Ok(()) => "OK",
        Err(e) => e.status().map(|s| s.as_str()).unwrap_or("ERROR"),
    };
    counter!("ldlm_acquire_total", "mode" => mode.as_str(), "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Arc<LockService> {
        Arc::new(LockService::new(LockManagerOptions::default()))
    }

    fn session(service: &LockService) -> SessionId {
        service.create_session(Some(Duration::from_secs(60))).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_and_unlock() {
        let svc = service();
        let a = session(&svc);

        let handle = svc
            .acquire(Some(&a), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(handle.name, "db1");
        assert_eq!(handle.session_id, a);

        assert!(svc.unlock(&a, "db1").is_ok());
        assert!(matches!(svc.unlock(&a, "db1"), Err(LdlmError::NotHeld { .. })));
        assert!(svc.lock_info("db1").is_none());
    }

    #[tokio::test]
    async fn test_unlock_with_unknown_session() {
        let svc = service();
        assert_eq!(
            svc.unlock("ghost", "db1"),
            Err(LdlmError::InvalidSession("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_acquire_with_unknown_session() {
        let svc = service();
        assert_eq!(
            svc.acquire(Some("ghost"), "db1", LockMode::Exclusive, Duration::ZERO)
                .await,
            Err(LdlmError::InvalidSession("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_acquire_rejects_empty_name() {
        let svc = service();
        let a = session(&svc);
        assert!(matches!(
            svc.acquire(Some(&a), "", LockMode::Exclusive, Duration::ZERO)
                .await,
            Err(LdlmError::IllegalArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_implicit_session() {
        let svc = service();
        let handle = svc
            .acquire(None, "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();
        assert!(svc.session_info(&handle.session_id).is_some());

        // A failed implicit acquire leaves no session behind
        let before = svc.stats().sessions;
        let result = svc
            .acquire(None, "db1", LockMode::Exclusive, Duration::ZERO)
            .await;
        assert!(matches!(result, Err(LdlmError::Timeout { .. })));
        assert_eq!(svc.stats().sessions, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_acquire_times_out_then_retry_succeeds() {
        let svc = service();
        let a = session(&svc);
        let b = session(&svc);

        svc.acquire(Some(&a), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let result = svc
            .acquire(Some(&b), "db1", LockMode::Exclusive, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(LdlmError::Timeout { .. })));
        assert!(svc.lock_info("db1").unwrap().waiters.is_empty());

        svc.unlock(&a, "db1").unwrap();
        assert!(
            svc.acquire(Some(&b), "db1", LockMode::Exclusive, Duration::ZERO)
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_acquire_granted_on_release() {
        let svc = service();
        let a = session(&svc);
        let b = session(&svc);

        svc.acquire(Some(&a), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let waiter = {
            let svc = svc.clone();
            let b = b.clone();
            tokio::spawn(async move {
                svc.acquire(Some(&b), "db1", LockMode::Exclusive, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        svc.unlock(&a, "db1").unwrap();

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.session_id, b);
        assert_eq!(svc.lock_info("db1").unwrap().holders, vec![b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_exclusive_before_shared_batch() {
        let svc = service();
        let holder = session(&svc);
        let w1 = session(&svc);
        let w2 = session(&svc);
        let w3 = session(&svc);

        svc.acquire(Some(&holder), "res", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let spawn_acquire = |session: SessionId, mode: LockMode| {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.acquire(Some(&session), "res", mode, Duration::from_secs(10))
                    .await
            })
        };

        let t1 = spawn_acquire(w1.clone(), LockMode::Exclusive);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let t2 = spawn_acquire(w2.clone(), LockMode::Shared);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let t3 = spawn_acquire(w3.clone(), LockMode::Shared);
        tokio::time::sleep(Duration::from_millis(1)).await;

        svc.unlock(&holder, "res").unwrap();
        t1.await.unwrap().unwrap();
        let info = svc.lock_info("res").unwrap();
        assert_eq!(info.holders, vec![w1.clone()]);
        assert_eq!(info.waiters.len(), 2);

        svc.unlock(&w1, "res").unwrap();
        t2.await.unwrap().unwrap();
        t3.await.unwrap().unwrap();
        let info = svc.lock_info("res").unwrap();
        assert_eq!(info.mode, LockMode::Shared);
        assert_eq!(info.holders.len(), 2);
        assert!(info.holders.contains(&w2) && info.holders.contains(&w3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_fifo_grants_shared_waiters_one_at_a_time() {
        let svc = Arc::new(LockService::new(LockManagerOptions {
            shared_batching: false,
            ..Default::default()
        }));
        let holder = session(&svc);
        let w1 = session(&svc);
        let w2 = session(&svc);
        let w3 = session(&svc);

        svc.acquire(Some(&holder), "res", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let spawn_acquire = |session: SessionId, mode: LockMode| {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.acquire(Some(&session), "res", mode, Duration::from_secs(10))
                    .await
            })
        };

        let t1 = spawn_acquire(w1.clone(), LockMode::Exclusive);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let t2 = spawn_acquire(w2.clone(), LockMode::Shared);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let t3 = spawn_acquire(w3.clone(), LockMode::Shared);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(svc.stats().waiters, 3);

        svc.unlock(&holder, "res").unwrap();
        t1.await.unwrap().unwrap();
        assert_eq!(svc.lock_info("res").unwrap().holders, vec![w1.clone()]);

        svc.unlock(&w1, "res").unwrap();
        t2.await.unwrap().unwrap();
        let info = svc.lock_info("res").unwrap();
        assert_eq!(info.mode, LockMode::Shared);
        assert_eq!(info.holders, vec![w2.clone()]);
        assert_eq!(info.waiters.len(), 1);
        assert_eq!(info.waiters[0].session_id, w3);

        svc.unlock(&w2, "res").unwrap();
        t3.await.unwrap().unwrap();
        assert_eq!(svc.lock_info("res").unwrap().holders, vec![w3]);
        assert_eq!(svc.stats().waiters, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_blocking_acquire_by_same_session() {
        let svc = service();
        let a = session(&svc);
        let b = session(&svc);

        svc.acquire(Some(&b), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let spawn_acquire = || {
            let svc = svc.clone();
            let a = a.clone();
            tokio::spawn(async move {
                svc.acquire(Some(&a), "db1", LockMode::Exclusive, Duration::from_secs(5))
                    .await
            })
        };
        let first = spawn_acquire();
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = spawn_acquire();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(svc.lock_info("db1").unwrap().waiters.len(), 2);

        svc.unlock(&b, "db1").unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());

        let info = svc.lock_info("db1").unwrap();
        assert_eq!(info.holders, vec![a.clone()]);
        assert!(info.waiters.is_empty());
        let session = svc.session_info(&a).unwrap();
        assert_eq!(session.held, vec!["db1".to_string()]);
        assert!(session.waiting.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_implicit_session_outlives_long_wait() {
        let svc = service();
        let a = session(&svc);

        svc.acquire(Some(&a), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let waiter = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.acquire(None, "db1", LockMode::Exclusive, Duration::from_secs(30))
                    .await
            })
        };

        // Longer than the default TTL of the implicit session
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(svc.reap_expired(), 0);
        svc.unlock(&a, "db1").unwrap();

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(svc.lock_info("db1").unwrap().holders, vec![handle.session_id.clone()]);

        // From the grant on, the implicit session runs on the default TTL
        let info = svc.session_info(&handle.session_id).unwrap();
        assert_eq!(info.ttl_ms, svc.options().default_ttl.as_millis() as u64);
        tokio::time::advance(svc.options().default_ttl + Duration::from_millis(1)).await;
        assert_eq!(svc.reap_expired(), 1);
        assert!(svc.lock_info("db1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_acquire_leaves_queue() {
        let svc = service();
        let a = session(&svc);
        let b = session(&svc);

        svc.acquire(Some(&a), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let waiter = {
            let svc = svc.clone();
            let b = b.clone();
            tokio::spawn(async move {
                svc.acquire(Some(&b), "db1", LockMode::Exclusive, Duration::from_secs(10))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(svc.lock_info("db1").unwrap().waiters.len(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert!(svc.lock_info("db1").unwrap().waiters.is_empty());
        assert!(svc.session_info(&b).unwrap().waiting.is_empty());

        svc.unlock(&a, "db1").unwrap();
        assert!(svc.lock_info("db1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_session_fails_pending_acquire() {
        let svc = service();
        let a = session(&svc);
        let b = session(&svc);

        svc.acquire(Some(&a), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        let waiter = {
            let svc = svc.clone();
            let b = b.clone();
            tokio::spawn(async move {
                svc.acquire(Some(&b), "db1", LockMode::Exclusive, Duration::from_secs(10))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(svc.destroy_session(&b).is_empty());
        assert_eq!(
            waiter.await.unwrap(),
            Err(LdlmError::InvalidSession(b.clone()))
        );
        assert!(svc.lock_info("db1").unwrap().waiters.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_recovers_crashed_session_locks() {
        let svc = service();
        let a = svc.create_session(Some(Duration::from_millis(1000))).unwrap();
        let c = session(&svc);

        svc.acquire(Some(&a), "job1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;
        // Keep c alive
        svc.heartbeat(&c).unwrap();

        assert_eq!(svc.reap_expired(), 1);
        assert!(svc.session_info(&a).is_none());
        assert!(
            svc.acquire(Some(&c), "job1", LockMode::Exclusive, Duration::ZERO)
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_lapsed_session_fails() {
        let svc = service();
        let a = svc.create_session(Some(Duration::from_millis(100))).unwrap();
        svc.acquire(Some(&a), "db1", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(svc.renew(&a, None), Err(LdlmError::InvalidSession(a.clone())));
        // Lapsed session was cleaned up on access
        assert!(svc.lock_info("db1").is_none());
    }

    #[tokio::test]
    async fn test_destroy_session_is_idempotent() {
        let svc = service();
        let a = session(&svc);
        svc.acquire(Some(&a), "x", LockMode::Shared, Duration::ZERO)
            .await
            .unwrap();
        svc.acquire(Some(&a), "y", LockMode::Exclusive, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(svc.destroy_session(&a), vec!["x".to_string(), "y".to_string()]);
        assert!(svc.destroy_session(&a).is_empty());
        assert_eq!(svc.stats(), Stats::default());
    }

    #[tokio::test]
    async fn test_session_limit_surfaces_resource_exhausted() {
        let svc = LockService::new(LockManagerOptions {
            max_sessions: 1,
            ..Default::default()
        });
        svc.create_session(None).unwrap();
        assert!(matches!(
            svc.acquire(None, "db1", LockMode::Exclusive, Duration::ZERO)
                .await,
            Err(LdlmError::ResourceExhausted(_))
        ));
    }
}
