//! HTTP response helpers
//!
//! Protocol outcomes (`OK`, `TIMEOUT`, ...) travel as HTTP 200 with a `status`
//! field. Everything else is an HTTP error carrying an `ErrorCode`.

use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

use ldlm_common::error::{PARAMETER_VALIDATE_ERROR, RESOURCE_NOT_FOUND, SERVER_ERROR};
use ldlm_common::{ErrorCode, LdlmError};

/// Error body for non-protocol failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResult {
    pub timestamp: String,
    pub code: i32,
    pub error: String,
    pub message: String,
}

impl ErrorResult {
    pub fn new(code: &ErrorCode<'_>, message: impl Into<String>) -> Self {
        ErrorResult {
            timestamp: chrono::Utc::now().to_rfc3339(),
            code: code.code,
            error: code.message.to_string(),
            message: message.into(),
        }
    }

    pub fn http_bad_request(message: impl Into<String>) -> HttpResponse {
        HttpResponse::BadRequest().json(ErrorResult::new(&PARAMETER_VALIDATE_ERROR, message))
    }

    pub fn http_not_found(message: impl Into<String>) -> HttpResponse {
        HttpResponse::NotFound().json(ErrorResult::new(&RESOURCE_NOT_FOUND, message))
    }

    pub fn http_server_error(message: impl Into<String>) -> HttpResponse {
        HttpResponse::InternalServerError().json(ErrorResult::new(&SERVER_ERROR, message))
    }

    /// Response for an error that has no protocol status.
    pub fn from_error(e: &LdlmError) -> HttpResponse {
        match e {
            LdlmError::IllegalArgument(_) => Self::http_bad_request(e.to_string()),
            _ => Self::http_server_error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_argument_is_bad_request() {
        let resp = ErrorResult::from_error(&LdlmError::IllegalArgument("empty name".to_string()));
        assert_eq!(resp.status(), 400);
    }

    #[test]
    fn test_persistence_error_is_server_error() {
        let resp = ErrorResult::from_error(&LdlmError::PersistenceError("disk full".to_string()));
        assert_eq!(resp.status(), 500);
    }

    #[test]
    fn test_error_result_carries_code() {
        let result = ErrorResult::new(&RESOURCE_NOT_FOUND, "lock 'db1' not found");
        assert_eq!(result.code, 20004);
        assert_eq!(result.error, "resource not found");
    }
}
