//! Error types and error codes for LDLM
//!
//! This module defines:
//! - `LdlmError`: the lock manager error taxonomy
//! - `ErrorCode`: structured error codes for transport error bodies

use serde::{Deserialize, Serialize};

use crate::model::Status;

/// Lock manager error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LdlmError {
    /// The referenced session is not present in the lease store.
    #[error("session '{0}' not found or expired")]
    InvalidSession(String),

    #[error("timed out after {waited_ms}ms waiting for lock '{name}'")]
    Timeout { name: String, waited_ms: u64 },

    #[error("lock '{name}' is not held by session '{session_id}'")]
    NotHeld { name: String, session_id: String },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl LdlmError {
    /// Protocol status for this error, if it belongs to the lock protocol.
    ///
    /// Ambient failures (bad input, persistence, configuration) have no wire
    /// status and are reported by the transport in its own way.
    pub fn status(&self) -> Option<Status> {
        match self {
            LdlmError::InvalidSession(_) => Some(Status::InvalidSession),
            LdlmError::Timeout { .. } => Some(Status::Timeout),
            LdlmError::NotHeld { .. } => Some(Status::NotHeld),
            LdlmError::ResourceExhausted(_) => Some(Status::ResourceExhausted),
            LdlmError::IllegalArgument(_)
            | LdlmError::PersistenceError(_)
            | LdlmError::ConfigError(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LdlmError>;

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};
