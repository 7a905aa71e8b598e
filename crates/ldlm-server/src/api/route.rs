//! Route table

use actix_web::{HttpRequest, Scope, error, web};

use crate::model::ErrorResult;

use super::{health, lock, session};

/// Malformed JSON bodies answer 400 with an error code instead of plain text.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
        let response = ErrorResult::http_bad_request(err.to_string());
        error::InternalError::from_response(err, response).into()
    })
}

pub fn lock_routes() -> Scope {
    web::scope("/v1")
        .route("/lock/acquire", web::post().to(lock::acquire))
        .route("/lock/unlock", web::post().to(lock::unlock))
        .route("/lock/{name:.*}", web::get().to(lock::lock_info))
        .route("/locks", web::get().to(lock::list_locks))
        .route("/session/create", web::post().to(session::create_session))
        .route("/session/renew", web::post().to(session::renew_session))
        .route("/session/heartbeat", web::post().to(session::heartbeat))
        .route("/session/destroy", web::post().to(session::destroy_session))
        .route("/session/{id}", web::get().to(session::session_info))
}

/// All routes; expects a `web::Data<LockService>` registered on the app.
pub fn routes() -> Scope {
    web::scope("")
        .app_data(json_config())
        .route("/health", web::get().to(health::health))
        .service(lock_routes())
}
