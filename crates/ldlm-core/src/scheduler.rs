//! Wait queue scheduler
//!
//! Orders blocked requesters per lock name and decides who is granted when the
//! holder set changes. Admission is FIFO by enqueue time. When shared batching
//! is enabled, a run of adjacent shared requests at the head is granted in one
//! pass; an exclusive request stops the run, so shared requests queued behind
//! it never overtake it.
//!
//! Every queued request is resolved exactly once: either promotion sends on
//! its grant channel (under the entry lock), or the waiter removes itself from
//! the queue (under the same lock). Whichever runs first wins.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use ldlm_common::{LdlmError, LockMode, Result, SessionId};

use crate::lease::LeaseStore;
use crate::table::{LockEntry, LockTable};

/// A blocked acquire call waiting in a lock's queue
#[derive(Debug)]
pub(crate) struct WaitRequest {
    pub(crate) id: u64,
    pub(crate) session_id: SessionId,
    pub(crate) mode: LockMode,
    pub(crate) enqueued_at: Instant,
    pub(crate) timeout: Duration,
    /// Carries whether the grant made the session a holder
    notify: oneshot::Sender<bool>,
}

impl WaitRequest {
    pub(crate) fn new(
        id: u64,
        session_id: SessionId,
        mode: LockMode,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (notify, rx) = oneshot::channel();
        (
            Self {
                id,
                session_id,
                mode,
                enqueued_at: Instant::now(),
                timeout,
                notify,
            },
            rx,
        )
    }
}

/// FIFO of wait requests for one lock name
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    requests: VecDeque<WaitRequest>,
}

impl WaitQueue {
    pub(crate) fn push(&mut self, request: WaitRequest) {
        self.requests.push_back(request);
    }

    pub(crate) fn front(&self) -> Option<&WaitRequest> {
        self.requests.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<WaitRequest> {
        self.requests.pop_front()
    }

    /// Remove one request by id, keeping the order of the rest.
    pub(crate) fn remove(&mut self, id: u64) -> Option<WaitRequest> {
        let pos = self.requests.iter().position(|r| r.id == id)?;
        self.requests.remove(pos)
    }

    /// Remove every request of a session. Dropping them closes their grant
    /// channels, which the waiting callers observe as an invalid session.
    pub(crate) fn remove_session(&mut self, session_id: &str) -> usize {
        let before = self.requests.len();
        self.requests.retain(|r| r.session_id != session_id);
        before - self.requests.len()
    }

    pub(crate) fn contains_session(&self, session_id: &str) -> bool {
        self.requests.iter().any(|r| r.session_id == session_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &WaitRequest> {
        self.requests.iter()
    }
}

/// Whether the request is by a current holder and needs no mode change.
fn is_reacquire(entry: &LockEntry, request: &WaitRequest) -> bool {
    entry.holders.contains(&request.session_id)
        && (entry.mode == LockMode::Exclusive || request.mode == LockMode::Shared)
}

/// Whether the head request may join the current holders.
fn head_admissible(entry: &LockEntry, head: &WaitRequest, shared_batching: bool) -> bool {
    entry.holders.is_empty()
        || is_reacquire(entry, head)
        || (shared_batching && head.mode.is_compatible_with(entry.mode))
}

/// Grant as many queued requests as the holder state allows.
///
/// Re-evaluates the head until it is incompatible or the queue is empty.
/// After an exclusive grant (or any grant in strict FIFO mode) only requests
/// of the sessions already holding the lock are let through, so a session
/// that queued twice is not left waiting on itself. Requests whose session
/// died are dropped; grants whose caller already gave up are rolled back.
/// Returns the sessions granted in this pass.
pub(crate) fn promote(
    name: &str,
    entry: &mut LockEntry,
    lease: &LeaseStore,
    shared_batching: bool,
) -> Vec<SessionId> {
    let mut granted = Vec::new();
    let mut batch_closed = false;

    while let Some(head) = entry.queue.front() {
        let admissible = if batch_closed {
            is_reacquire(entry, head)
        } else {
            head_admissible(entry, head, shared_batching)
        };
        if !admissible {
            break;
        }
        let Some(request) = entry.queue.pop_front() else {
            break;
        };
        let still_waiting = entry.queue.contains_session(&request.session_id);
        if !still_waiting {
            lease.detach_waiter(&request.session_id, name);
        }

        let already_holder = entry.holders.contains(&request.session_id);
        if !already_holder {
            if !lease.attach_holder(&request.session_id, name) {
                debug!(lock = %name, session_id = %request.session_id, "Dropping waiter of dead session");
                continue;
            }
            if entry.holders.is_empty() {
                entry.mode = request.mode;
            }
            entry.holders.insert(request.session_id.clone());
        }

        if request.notify.send(!already_holder).is_err() {
            // The caller timed out or went away before we got here.
            if !already_holder {
                entry.holders.remove(&request.session_id);
                lease.detach_holder(&request.session_id, name);
            }
            continue;
        }

        debug!(
            lock = %name,
            session_id = %request.session_id,
            mode = %entry.mode,
            waited_ms = request.enqueued_at.elapsed().as_millis() as u64,
            "Waiter granted"
        );
        if request.mode == LockMode::Exclusive || !shared_batching {
            batch_closed = true;
        }
        granted.push(request.session_id);
        entry.assert_invariants(name);
    }

    granted
}

/// A queued acquire in flight.
///
/// Dropping an unresolved ticket (the caller's future was cancelled) removes
/// the request from its queue, or rolls back the grant if promotion already
/// handed it over.
pub struct WaitTicket {
    table: Arc<LockTable>,
    name: String,
    session_id: SessionId,
    id: u64,
    rx: oneshot::Receiver<bool>,
    resolved: bool,
}

impl WaitTicket {
    pub(crate) fn new(
        table: Arc<LockTable>,
        name: String,
        session_id: SessionId,
        id: u64,
        rx: oneshot::Receiver<bool>,
    ) -> Self {
        Self {
            table,
            name,
            session_id,
            id,
            rx,
            resolved: false,
        }
    }

    /// Suspend until granted, timed out, or the session is destroyed.
    pub async fn wait(mut self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, &mut self.rx).await;
        self.resolved = true;

        match outcome {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LdlmError::InvalidSession(self.session_id.clone())),
            Err(_) => {
                if self.table.cancel_waiter(&self.name, &self.session_id, self.id) {
                    return Err(LdlmError::Timeout {
                        name: self.name.clone(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                // Not in the queue any more: promotion resolved it first.
                match self.rx.try_recv() {
                    Ok(_) => Ok(()),
                    Err(_) => Err(LdlmError::InvalidSession(self.session_id.clone())),
                }
            }
        }
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if self.table.cancel_waiter(&self.name, &self.session_id, self.id) {
            debug!(lock = %self.name, session_id = %self.session_id, "Waiter aborted");
            return;
        }
        // A repeated request of an existing holder granted nothing to undo.
        if let Ok(true) = self.rx.try_recv() {
            debug!(lock = %self.name, session_id = %self.session_id, "Rolling back grant of aborted waiter");
            let _ = self.table.release(&self.name, &self.session_id);
        }
    }
}
