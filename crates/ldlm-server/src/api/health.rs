//! Liveness and stats

use actix_web::{HttpResponse, web};
use serde::Serialize;

use ldlm_common::model::Stats;
use ldlm_core::LockService;

use crate::metrics;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: Stats,
}

/// GET /health
pub async fn health(service: web::Data<LockService>) -> HttpResponse {
    let stats = service.stats();
    metrics::record_stats(&stats);
    HttpResponse::Ok().json(HealthResponse {
        status: "UP",
        stats,
    })
}
