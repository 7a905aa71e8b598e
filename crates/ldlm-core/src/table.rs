//! Lock table
//!
//! Ownership bookkeeping per lock name. Entries live in a sharded `DashMap`;
//! every mutation of one name runs under that entry's shard guard, so a name
//! has exactly one mutation in flight while unrelated names proceed in
//! parallel. A name with no holders and no waiters is removed.
//!
//! Lock order is table shard, then lease store. Nothing here touches a second
//! table entry while holding one.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use ldlm_common::model::{LockInfo, WaiterInfo};
use ldlm_common::{LdlmError, LockMode, Result, SessionId};

use crate::lease::{DestroyedSession, LeaseStore};
use crate::scheduler::{self, WaitQueue, WaitRequest};

/// Holder and wait state of one lock name
#[derive(Debug, Default)]
pub(crate) struct LockEntry {
    pub(crate) mode: LockMode,
    pub(crate) holders: BTreeSet<SessionId>,
    pub(crate) queue: WaitQueue,
}

impl LockEntry {
    fn is_empty(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }

    /// Whether a new request may be granted right away.
    ///
    /// Requires an empty queue so that newcomers never overtake waiters.
    fn admits(&self, mode: LockMode) -> bool {
        self.queue.is_empty()
            && (self.holders.is_empty() || mode.is_compatible_with(self.mode))
    }

    /// Crash on corrupted holder state rather than serve it.
    pub(crate) fn assert_invariants(&self, name: &str) {
        if self.mode == LockMode::Exclusive && self.holders.len() > 1 {
            panic!(
                "lock table corrupted: '{}' has {} exclusive holders",
                name,
                self.holders.len()
            );
        }
    }

    fn info(&self, name: &str) -> LockInfo {
        LockInfo {
            name: name.to_string(),
            mode: self.mode,
            holders: self.holders.iter().cloned().collect(),
            waiters: self
                .queue
                .iter()
                .map(|r| WaiterInfo {
                    session_id: r.session_id.clone(),
                    mode: r.mode,
                })
                .collect(),
        }
    }
}

/// Result of an acquire attempt against the table
#[derive(Debug)]
pub enum Admission {
    Granted,
    /// Incompatible with current state and the caller did not ask to wait
    Blocked,
    /// Enqueued; the receiver resolves when promotion grants the request,
    /// with `false` if the session already held the lock by then
    Queued { id: u64, rx: oneshot::Receiver<bool> },
}

/// Persisted form of a lock entry. Waiters are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub name: String,
    pub mode: LockMode,
    pub holders: Vec<SessionId>,
}

pub struct LockTable {
    entries: DashMap<String, LockEntry>,
    lease: Arc<LeaseStore>,
    count: AtomicUsize,
    waiters: AtomicUsize,
    next_waiter_id: AtomicU64,
    max_locks: usize,
    shared_batching: bool,
}

impl LockTable {
    pub fn new(lease: Arc<LeaseStore>, max_locks: usize, shared_batching: bool) -> Self {
        Self {
            entries: DashMap::new(),
            lease,
            count: AtomicUsize::new(0),
            waiters: AtomicUsize::new(0),
            next_waiter_id: AtomicU64::new(1),
            max_locks,
            shared_batching,
        }
    }

    /// Non-blocking acquire: `Granted` if compatible with current holders
    /// and nobody is queued ahead, otherwise `Blocked`.
    pub fn try_acquire(&self, name: &str, session_id: &str, mode: LockMode) -> Result<Admission> {
        self.acquire(name, session_id, mode, None)
    }

    /// Acquire, or enqueue a wait request when blocked.
    ///
    /// Checking and enqueueing happen under the same guard, so a release can
    /// never slip in between and leave the request unnoticed.
    pub fn acquire_or_enqueue(
        &self,
        name: &str,
        session_id: &str,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Admission> {
        self.acquire(name, session_id, mode, Some(timeout))
    }

    fn acquire(
        &self,
        name: &str,
        session_id: &str,
        mode: LockMode,
        wait: Option<Duration>,
    ) -> Result<Admission> {
        if !self.lease.touch(session_id) {
            return Err(LdlmError::InvalidSession(session_id.to_string()));
        }

        let mut entry = match self.entries.entry(name.to_string()) {
            Entry::Occupied(occupied) => occupied.into_ref(),
            Entry::Vacant(vacant) => {
                self.reserve_slot()?;
                vacant.insert(LockEntry::default())
            }
        };

        // Re-acquire by a current holder
        if entry.holders.contains(session_id) {
            if entry.mode == LockMode::Exclusive || mode == LockMode::Shared {
                debug!(lock = %name, session_id = %session_id, "Re-acquire by holder");
                return Ok(Admission::Granted);
            }
            // Upgrade from shared: only in place, never queued behind itself
            if entry.holders.len() == 1 && entry.queue.is_empty() {
                entry.mode = LockMode::Exclusive;
                debug!(lock = %name, session_id = %session_id, "Shared lock upgraded");
                return Ok(Admission::Granted);
            }
            return Ok(Admission::Blocked);
        }

        if entry.admits(mode) {
            if !self.lease.attach_holder(session_id, name) {
                drop(entry);
                self.remove_if_empty(name);
                return Err(LdlmError::InvalidSession(session_id.to_string()));
            }
            if entry.holders.is_empty() {
                entry.mode = mode;
            }
            entry.holders.insert(session_id.to_string());
            entry.assert_invariants(name);
            debug!(lock = %name, session_id = %session_id, mode = %mode, "Lock granted");
            return Ok(Admission::Granted);
        }

        let Some(timeout) = wait else {
            return Ok(Admission::Blocked);
        };

        if !self.lease.attach_waiter(session_id, name) {
            drop(entry);
            self.remove_if_empty(name);
            return Err(LdlmError::InvalidSession(session_id.to_string()));
        }
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (request, rx) = WaitRequest::new(id, session_id.to_string(), mode, timeout);
        debug!(
            lock = %name,
            session_id = %session_id,
            mode = %mode,
            timeout_ms = request.timeout.as_millis() as u64,
            position = entry.queue.len(),
            "Waiter enqueued"
        );
        entry.queue.push(request);
        self.waiters.fetch_add(1, Ordering::AcqRel);
        Ok(Admission::Queued { id, rx })
    }

    /// Remove `session_id` from the holders of `name` and promote waiters.
    pub fn release(&self, name: &str, session_id: &str) -> Result<()> {
        let not_held = || LdlmError::NotHeld {
            name: name.to_string(),
            session_id: session_id.to_string(),
        };

        {
            let mut entry = self.entries.get_mut(name).ok_or_else(not_held)?;
            if !entry.holders.remove(session_id) {
                return Err(not_held());
            }
            self.lease.detach_holder(session_id, name);
            debug!(lock = %name, session_id = %session_id, "Lock released");
            self.promote(name, &mut entry);
        }

        self.remove_if_empty(name);
        Ok(())
    }

    /// Take a wait request out of its queue.
    ///
    /// Returns `false` if it is no longer queued, i.e. promotion already
    /// resolved it. Removal may unblock the requests behind it.
    pub fn cancel_waiter(&self, name: &str, session_id: &str, id: u64) -> bool {
        let removed = {
            let Some(mut entry) = self.entries.get_mut(name) else {
                return false;
            };
            let removed = entry.queue.remove(id).is_some();
            if removed {
                self.waiters.fetch_sub(1, Ordering::AcqRel);
                if !entry.queue.contains_session(session_id) {
                    self.lease.detach_waiter(session_id, name);
                }
                self.promote(name, &mut entry);
            }
            removed
        };

        if removed {
            self.remove_if_empty(name);
        }
        removed
    }

    /// Release everything a destroyed session held and drop its wait requests.
    ///
    /// Returns the names it held, sorted.
    pub fn force_release_all(&self, destroyed: &DestroyedSession) -> Vec<String> {
        let mut released = Vec::with_capacity(destroyed.held.len());

        for name in &destroyed.held {
            let was_holder = match self.entries.get_mut(name) {
                Some(mut entry) => {
                    let was_holder = entry.holders.remove(&destroyed.id);
                    let dropped = entry.queue.remove_session(&destroyed.id);
                    self.waiters.fetch_sub(dropped, Ordering::AcqRel);
                    self.promote(name, &mut entry);
                    was_holder
                }
                None => false,
            };
            self.remove_if_empty(name);
            if was_holder {
                released.push(name.clone());
            }
        }

        for name in &destroyed.waiting {
            if let Some(mut entry) = self.entries.get_mut(name) {
                let dropped = entry.queue.remove_session(&destroyed.id);
                if dropped > 0 {
                    self.waiters.fetch_sub(dropped, Ordering::AcqRel);
                    self.promote(name, &mut entry);
                }
            }
            self.remove_if_empty(name);
        }

        released.sort();
        if !released.is_empty() {
            debug!(session_id = %destroyed.id, locks = ?released, "Released locks of destroyed session");
        }
        released
    }

    /// Rebuild an entry from a snapshot. Holders whose session was not
    /// restored are dropped; an entry left without holders is skipped.
    pub fn restore_entry(&self, snapshot: &LockSnapshot) -> Result<bool> {
        if snapshot.mode == LockMode::Exclusive && snapshot.holders.len() > 1 {
            return Err(LdlmError::PersistenceError(format!(
                "lock '{}' has {} exclusive holders in snapshot",
                snapshot.name,
                snapshot.holders.len()
            )));
        }

        let holders: BTreeSet<SessionId> = snapshot
            .holders
            .iter()
            .filter(|session_id| self.lease.attach_holder(session_id, &snapshot.name))
            .cloned()
            .collect();
        if holders.is_empty() {
            return Ok(false);
        }

        match self.entries.entry(snapshot.name.clone()) {
            Entry::Occupied(_) => Err(LdlmError::PersistenceError(format!(
                "duplicate lock '{}' in snapshot",
                snapshot.name
            ))),
            Entry::Vacant(vacant) => {
                self.reserve_slot()?;
                vacant.insert(LockEntry {
                    mode: snapshot.mode,
                    holders,
                    queue: WaitQueue::default(),
                });
                Ok(true)
            }
        }
    }

    /// Run promotion on an entry whose guard the caller holds.
    fn promote(&self, name: &str, entry: &mut LockEntry) {
        let queued = entry.queue.len();
        scheduler::promote(name, entry, &self.lease, self.shared_batching);
        self.waiters
            .fetch_sub(queued - entry.queue.len(), Ordering::AcqRel);
    }

    fn remove_if_empty(&self, name: &str) {
        if self.entries.remove_if(name, |_, entry| entry.is_empty()).is_some() {
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn reserve_slot(&self) -> Result<()> {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        if previous >= self.max_locks {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(LdlmError::ResourceExhausted(format!(
                "lock table limit of {} reached",
                self.max_locks
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn info(&self, name: &str) -> Option<LockInfo> {
        self.entries.get(name).map(|entry| entry.info(name))
    }

    pub fn list(&self) -> Vec<LockInfo> {
        let mut locks: Vec<LockInfo> = self
            .entries
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect();
        locks.sort_by(|a, b| a.name.cmp(&b.name));
        locks
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued requests across all names.
    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub fn export(&self) -> Vec<LockSnapshot> {
        self.entries
            .iter()
            .filter(|entry| !entry.holders.is_empty())
            .map(|entry| LockSnapshot {
                name: entry.key().clone(),
                mode: entry.mode,
                holders: entry.holders.iter().cloned().collect(),
            })
            .collect()
    }
}
