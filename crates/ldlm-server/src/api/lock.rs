//! Lock endpoints

use std::time::Duration;

use actix_web::{HttpResponse, web};
use tracing::{debug, error};

use ldlm_common::model::{AcquireRequest, AcquireResponse, StatusResponse, UnlockRequest};
use ldlm_common::{LdlmError, Status};
use ldlm_core::LockService;

use crate::model::ErrorResult;

/// POST /v1/lock/acquire
///
/// Blocks up to `wait_timeout_ms` for a grant. If the client disconnects
/// first, the dropped handler future withdraws the wait request.
pub async fn acquire(
    service: web::Data<LockService>,
    body: web::Json<AcquireRequest>,
) -> HttpResponse {
    let req = body.into_inner();
    let result = service
        .acquire(
            req.session_id.as_deref(),
            &req.name,
            req.mode,
            Duration::from_millis(req.wait_timeout_ms),
        )
        .await;

    match result {
        Ok(handle) => HttpResponse::Ok().json(AcquireResponse {
            status: Status::Ok,
            session_id: Some(handle.session_id),
            lock_name: handle.name,
        }),
        Err(e) => match e.status() {
            Some(status) => {
                debug!(lock = %req.name, status = %status, "Acquire refused");
                HttpResponse::Ok().json(AcquireResponse {
                    status,
                    session_id: req.session_id,
                    lock_name: req.name,
                })
            }
            None => {
                if !matches!(e, LdlmError::IllegalArgument(_)) {
                    error!(lock = %req.name, error = %e, "Acquire failed");
                }
                ErrorResult::from_error(&e)
            }
        },
    }
}

/// POST /v1/lock/unlock
pub async fn unlock(
    service: web::Data<LockService>,
    body: web::Json<UnlockRequest>,
) -> HttpResponse {
    match service.unlock(&body.session_id, &body.name) {
        Ok(()) => HttpResponse::Ok().json(StatusResponse::new(Status::Ok)),
        Err(e) => match e.status() {
            Some(status) => HttpResponse::Ok().json(StatusResponse::new(status)),
            None => ErrorResult::from_error(&e),
        },
    }
}

/// GET /v1/lock/{name}
pub async fn lock_info(service: web::Data<LockService>, path: web::Path<String>) -> HttpResponse {
    let name = path.into_inner();
    match service.lock_info(&name) {
        Some(info) => HttpResponse::Ok().json(info),
        None => ErrorResult::http_not_found(format!("lock '{}' is not held", name)),
    }
}

/// GET /v1/locks
pub async fn list_locks(service: web::Data<LockService>) -> HttpResponse {
    HttpResponse::Ok().json(service.list_locks())
}
