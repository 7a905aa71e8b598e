//! Transport-agnostic request/response model
//!
//! Any transport (HTTP, gRPC, raw sockets) can carry these types. Field names
//! follow the wire contract: `session_id`, `name`, `mode`, `wait_timeout_ms`,
//! `ttl_ms`, `status`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque session token handed out by the lease store.
pub type SessionId = String;

/// Lock mode requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    /// At most one holder
    #[default]
    Exclusive,
    /// Any number of mutually compatible holders
    Shared,
}

impl LockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LockMode::Exclusive => "EXCLUSIVE",
            LockMode::Shared => "SHARED",
        }
    }

    /// Whether a request in `self` mode can join holders held in `held` mode.
    pub fn is_compatible_with(self, held: LockMode) -> bool {
        self == LockMode::Shared && held == LockMode::Shared
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol status returned with every lock operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Timeout,
    InvalidSession,
    NotHeld,
    ResourceExhausted,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Timeout => "TIMEOUT",
            Status::InvalidSession => "INVALID_SESSION",
            Status::NotHeld => "NOT_HELD",
            Status::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquireRequest {
    /// Absent means "create an implicit session for me"
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub name: String,
    #[serde(default)]
    pub mode: LockMode,
    /// Zero means a non-blocking try
    #[serde(default)]
    pub wait_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub session_id: SessionId,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewRequest {
    pub session_id: SessionId,
    /// Absent keeps the session's current TTL
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

/// Body shared by heartbeat and destroy requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: SessionId,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<SessionId>,
    pub lock_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

impl StatusResponse {
    pub fn new(status: Status) -> Self {
        Self { status }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroySessionResponse {
    pub status: Status,
    #[serde(default)]
    pub released: Vec<String>,
}

// ============================================================================
// Inspection
// ============================================================================

/// Point-in-time view of one lock entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub name: String,
    pub mode: LockMode,
    pub holders: Vec<SessionId>,
    pub waiters: Vec<WaiterInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterInfo {
    pub session_id: SessionId,
    pub mode: LockMode,
}

/// Point-in-time view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub ttl_ms: u64,
    pub expires_in_ms: u64,
    pub held: Vec<String>,
    pub waiting: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sessions: usize,
    pub locks: usize,
    pub waiters: usize,
}
