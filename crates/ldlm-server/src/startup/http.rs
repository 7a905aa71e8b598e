//! HTTP server setup

use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware::Logger, web};

use ldlm_core::LockService;

use crate::api;

/// Creates and binds the lock server.
///
/// `shutdown_timeout_secs` bounds how long in-flight requests, including
/// blocked acquires, may run once the server is asked to stop.
pub fn main_server(
    service: Arc<LockService>,
    address: String,
    port: u16,
    shutdown_timeout_secs: u64,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::from(service.clone()))
            .service(api::routes())
    })
    .disable_signals()
    .shutdown_timeout(shutdown_timeout_secs)
    .bind((address, port))?
    .run())
}
