//! Lease store
//!
//! Source of truth for session liveness. Every session carries a TTL and a
//! last-renewal instant; it is live while `last_renewal_at + ttl >= now`.
//! Sessions keep non-owning back-references (lock names) to what they hold
//! and wait on, so destroying a session can cascade to the lock table.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use ldlm_common::model::SessionInfo;
use ldlm_common::{LdlmError, Result, SessionId};

/// A single client session
#[derive(Debug)]
struct SessionRecord {
    created_at_unix_ms: i64,
    last_renewal_at: Instant,
    last_renewal_unix_ms: i64,
    ttl: Duration,
    held: HashSet<String>,
    waiting: HashSet<String>,
}

impl SessionRecord {
    fn deadline(&self) -> Instant {
        self.last_renewal_at + self.ttl
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.deadline() < now
    }
}

/// What a destroyed session left behind, for cascade release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyedSession {
    pub id: SessionId,
    pub held: Vec<String>,
    pub waiting: Vec<String>,
}

/// Persisted form of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub ttl_ms: u64,
    pub created_at_unix_ms: i64,
    pub last_renewal_unix_ms: i64,
}

pub struct LeaseStore {
    sessions: DashMap<SessionId, SessionRecord>,
    /// Sessions ordered by `last_renewal_at + ttl`, consumed by the reaper.
    /// Only updated while the owning session's map shard is locked.
    expiry_index: Mutex<BTreeSet<(Instant, SessionId)>>,
    count: AtomicUsize,
    max_sessions: usize,
}

impl LeaseStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            expiry_index: Mutex::new(BTreeSet::new()),
            count: AtomicUsize::new(0),
            max_sessions,
        }
    }

    /// Allocate a new session with `last_renewal_at = now`.
    pub fn create_session(&self, ttl: Duration) -> Result<SessionId> {
        self.reserve_slot()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let now_unix_ms = current_unix_ms();
        let record = SessionRecord {
            created_at_unix_ms: now_unix_ms,
            last_renewal_at: now,
            last_renewal_unix_ms: now_unix_ms,
            ttl,
            held: HashSet::new(),
            waiting: HashSet::new(),
        };

        match self.sessions.entry(id.clone()) {
            Entry::Vacant(slot) => {
                self.expiry_index.lock().insert((record.deadline(), id.clone()));
                slot.insert(record);
            }
            Entry::Occupied(_) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                panic!("session id collision for '{}'", id);
            }
        }

        info!(session_id = %id, ttl_ms = ttl.as_millis() as u64, "Session created");
        Ok(id)
    }

    /// Re-insert a session from a snapshot.
    ///
    /// The remaining lease is `ttl - (now - last_renewal)`. Returns `false` and
    /// inserts nothing when that lease has already run out.
    pub fn restore_session(&self, snapshot: &SessionSnapshot) -> Result<bool> {
        let ttl = Duration::from_millis(snapshot.ttl_ms);
        let now_unix_ms = current_unix_ms();
        let since_renewal =
            Duration::from_millis((now_unix_ms - snapshot.last_renewal_unix_ms).max(0) as u64);
        if since_renewal > ttl {
            return Ok(false);
        }

        self.reserve_slot()?;
        let now = Instant::now();
        let record = SessionRecord {
            created_at_unix_ms: snapshot.created_at_unix_ms,
            last_renewal_at: now.checked_sub(since_renewal).unwrap_or(now),
            last_renewal_unix_ms: snapshot.last_renewal_unix_ms,
            ttl,
            held: HashSet::new(),
            waiting: HashSet::new(),
        };

        match self.sessions.entry(snapshot.id.clone()) {
            Entry::Vacant(slot) => {
                self.expiry_index
                    .lock()
                    .insert((record.deadline(), snapshot.id.clone()));
                slot.insert(record);
                Ok(true)
            }
            Entry::Occupied(_) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                Err(LdlmError::PersistenceError(format!(
                    "duplicate session '{}' in snapshot",
                    snapshot.id
                )))
            }
        }
    }

    /// Reset the lease of a live session, optionally changing its TTL.
    ///
    /// Fails with `InvalidSession` if the session is gone or its lease already
    /// lapsed; a lapsed session is left for the reaper.
    pub fn renew(&self, session_id: &str, ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let mut record = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| LdlmError::InvalidSession(session_id.to_string()))?;

        if record.is_expired(now) {
            return Err(LdlmError::InvalidSession(session_id.to_string()));
        }

        let old_deadline = record.deadline();
        record.last_renewal_at = now;
        record.last_renewal_unix_ms = current_unix_ms();
        if let Some(ttl) = ttl {
            record.ttl = ttl;
        }

        let mut index = self.expiry_index.lock();
        index.remove(&(old_deadline, session_id.to_string()));
        index.insert((record.deadline(), session_id.to_string()));

        debug!(session_id = %session_id, ttl_ms = record.ttl.as_millis() as u64, "Session renewed");
        Ok(())
    }

    /// Whether the session exists and its lease has not lapsed.
    pub fn touch(&self, session_id: &str) -> bool {
        let now = Instant::now();
        self.sessions
            .get(session_id)
            .is_some_and(|record| !record.is_expired(now))
    }

    /// Whether the session exists at all, live or lapsed.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Remove a session. Idempotent: destroying an unknown id returns `None`.
    pub fn destroy(&self, session_id: &str) -> Option<DestroyedSession> {
        let (id, record) = self.sessions.remove(session_id)?;
        Some(self.finish_removal(id, record))
    }

    /// Remove a session only if its lease has lapsed at `now`.
    ///
    /// Guards against a renewal that lands between the reaper's index scan and
    /// the removal.
    pub fn destroy_if_expired(&self, session_id: &str, now: Instant) -> Option<DestroyedSession> {
        let (id, record) = self
            .sessions
            .remove_if(session_id, |_, record| record.is_expired(now))?;
        Some(self.finish_removal(id, record))
    }

    fn finish_removal(&self, id: SessionId, record: SessionRecord) -> DestroyedSession {
        self.expiry_index.lock().remove(&(record.deadline(), id.clone()));
        self.count.fetch_sub(1, Ordering::AcqRel);
        DestroyedSession {
            id,
            held: record.held.into_iter().collect(),
            waiting: record.waiting.into_iter().collect(),
        }
    }

    /// Ids of sessions whose lease lapsed before `now`, in expiry order.
    pub fn expired_sessions(&self, now: Instant) -> Vec<SessionId> {
        self.expiry_index
            .lock()
            .iter()
            .take_while(|(deadline, _)| *deadline < now)
            .map(|(_, id)| id.clone())
            .collect()
    }

    // ========================================================================
    // Back-references maintained by the lock table
    // ========================================================================

    /// Record that the session holds `name`. Fails if the session is gone or
    /// lapsed, in which case the caller must not commit the grant.
    pub fn attach_holder(&self, session_id: &str, name: &str) -> bool {
        self.attach(session_id, name, |record| &mut record.held)
    }

    pub fn detach_holder(&self, session_id: &str, name: &str) {
        if let Some(mut record) = self.sessions.get_mut(session_id) {
            record.held.remove(name);
        }
    }

    /// Record that the session waits on `name`.
    pub fn attach_waiter(&self, session_id: &str, name: &str) -> bool {
        self.attach(session_id, name, |record| &mut record.waiting)
    }

    pub fn detach_waiter(&self, session_id: &str, name: &str) {
        if let Some(mut record) = self.sessions.get_mut(session_id) {
            record.waiting.remove(name);
        }
    }

    fn attach(
        &self,
        session_id: &str,
        name: &str,
        set: impl FnOnce(&mut SessionRecord) -> &mut HashSet<String>,
    ) -> bool {
        let now = Instant::now();
        match self.sessions.get_mut(session_id) {
            Some(mut record) if !record.is_expired(now) => {
                set(&mut record).insert(name.to_string());
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        let now = Instant::now();
        let record = self.sessions.get(session_id)?;
        let mut held: Vec<String> = record.held.iter().cloned().collect();
        let mut waiting: Vec<String> = record.waiting.iter().cloned().collect();
        held.sort();
        waiting.sort();
        Some(SessionInfo {
            id: session_id.to_string(),
            ttl_ms: record.ttl.as_millis() as u64,
            expires_in_ms: record.deadline().saturating_duration_since(now).as_millis() as u64,
            held,
            waiting,
        })
    }

    /// Persistable view of every live session.
    pub fn export(&self) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| SessionSnapshot {
                id: entry.key().clone(),
                ttl_ms: entry.value().ttl.as_millis() as u64,
                created_at_unix_ms: entry.value().created_at_unix_ms,
                last_renewal_unix_ms: entry.value().last_renewal_unix_ms,
            })
            .collect()
    }

    fn reserve_slot(&self) -> Result<()> {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        if previous >= self.max_sessions {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(LdlmError::ResourceExhausted(format!(
                "session limit of {} reached",
                self.max_sessions
            )));
        }
        Ok(())
    }
}

pub(crate) fn current_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
