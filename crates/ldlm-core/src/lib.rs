//! LDLM Core - lease-based lock manager
//!
//! This crate provides:
//! - Session leases with TTL and renewal (`lease`)
//! - Per-name lock ownership in shared/exclusive modes (`table`)
//! - FIFO wait queues with shared batching (`scheduler`)
//! - Background expiry of lapsed sessions (`reaper`)
//! - JSON state snapshots for restart recovery (`snapshot`)
//! - The transport-agnostic `LockService` tying them together

pub mod config;
pub mod lease;
pub mod reaper;
mod scheduler;
pub mod service;
pub mod snapshot;
pub mod table;

// Re-export commonly used types
pub use config::LockManagerOptions;
pub use lease::{DestroyedSession, LeaseStore, SessionSnapshot};
pub use reaper::SessionReaper;
pub use scheduler::WaitTicket;
pub use service::{LockHandle, LockService};
pub use snapshot::{RestoreSummary, Snapshot};
pub use table::{Admission, LockSnapshot, LockTable};
