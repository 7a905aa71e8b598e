//! Session endpoints

use std::time::Duration;

use actix_web::{HttpResponse, web};

use ldlm_common::model::{
    CreateSessionRequest, CreateSessionResponse, DestroySessionResponse, RenewRequest,
    SessionRequest, StatusResponse,
};
use ldlm_common::{LdlmError, Status};
use ldlm_core::LockService;

use crate::model::ErrorResult;

fn status_response(result: Result<(), LdlmError>) -> HttpResponse {
    match result {
        Ok(()) => HttpResponse::Ok().json(StatusResponse::new(Status::Ok)),
        Err(e) => match e.status() {
            Some(status) => HttpResponse::Ok().json(StatusResponse::new(status)),
            None => ErrorResult::from_error(&e),
        },
    }
}

/// POST /v1/session/create
pub async fn create_session(
    service: web::Data<LockService>,
    body: web::Json<CreateSessionRequest>,
) -> HttpResponse {
    let ttl = body.ttl_ms.map(Duration::from_millis);
    match service.create_session(ttl) {
        Ok(session_id) => HttpResponse::Ok().json(CreateSessionResponse {
            status: Status::Ok,
            session_id: Some(session_id),
        }),
        Err(e) => match e.status() {
            Some(status) => HttpResponse::Ok().json(CreateSessionResponse {
                status,
                session_id: None,
            }),
            None => ErrorResult::from_error(&e),
        },
    }
}

/// POST /v1/session/renew
pub async fn renew_session(
    service: web::Data<LockService>,
    body: web::Json<RenewRequest>,
) -> HttpResponse {
    let ttl = body.ttl_ms.map(Duration::from_millis);
    status_response(service.renew(&body.session_id, ttl))
}

/// POST /v1/session/heartbeat
pub async fn heartbeat(
    service: web::Data<LockService>,
    body: web::Json<SessionRequest>,
) -> HttpResponse {
    status_response(service.heartbeat(&body.session_id))
}

/// POST /v1/session/destroy
///
/// Idempotent: an unknown session reports `OK` with nothing released.
pub async fn destroy_session(
    service: web::Data<LockService>,
    body: web::Json<SessionRequest>,
) -> HttpResponse {
    let released = service.destroy_session(&body.session_id);
    HttpResponse::Ok().json(DestroySessionResponse {
        status: Status::Ok,
        released,
    })
}

/// GET /v1/session/{id}
pub async fn session_info(
    service: web::Data<LockService>,
    path: web::Path<String>,
) -> HttpResponse {
    let session_id = path.into_inner();
    match service.session_info(&session_id) {
        Some(info) => HttpResponse::Ok().json(info),
        None => ErrorResult::http_not_found(format!("session '{}' not found", session_id)),
    }
}
