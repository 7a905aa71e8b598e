//! LDLM Common - Shared types for the lock manager
//!
//! This crate provides the foundational types used across all LDLM components:
//! - Error taxonomy and structured error codes
//! - The transport-agnostic request/response model
//! - Lock name validation

pub mod error;
pub mod model;
pub mod validation;

// Re-exports for convenience
pub use error::{ErrorCode, LdlmError, Result};
pub use model::{LockMode, SessionId, Status};
