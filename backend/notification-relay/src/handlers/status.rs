/// Liveness and build information endpoints
use actix_web::{web, HttpResponse};
use serde::Serialize;

use crate::metrics;

/// Version string reported by `GET /version`
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: String,
}

impl ServiceInfo {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            service: env!("CARGO_PKG_NAME"),
            version: version.into(),
        }
    }
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

pub async fn version(info: web::Data<ServiceInfo>) -> HttpResponse {
    HttpResponse::Ok().json(info.get_ref())
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/version", web::get().to(version))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}
