use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

use crate::health::HealthMonitor;
use crate::metrics::Metrics;
use crate::query::{QueryError, QueryService};

// ============================================================================
// HTTP Handlers
// ============================================================================
//
// GET /order/{id}  order JSON, 404 when unknown, 503 while hydrating
// GET /health      component health, 503 when any component is unhealthy
// GET /ready       200 once the cache is hydrated
// GET /metrics     Prometheus text format
//
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub metrics: Arc<Metrics>,
    pub health: Arc<HealthMonitor>,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/order/{id}", web::get().to(get_order))
        .route("/health", web::get().to(health_handler))
        .route("/ready", web::get().to(ready_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

async fn get_order(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let order_uid = path.into_inner();

    match state.query.find_by_id(&order_uid).await {
        Ok(Some(order)) => {
            state.metrics.record_query("found");
            HttpResponse::Ok().json(&*order)
        }
        Ok(None) => {
            state.metrics.record_query("not_found");
            HttpResponse::NotFound().json(serde_json::json!({ "msg": "Order not found" }))
        }
        Err(e @ QueryError::Hydrating) => {
            state.metrics.record_query("unavailable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({ "msg": e.to_string() }))
        }
    }
}

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let health = state.health.system_health().await;

    if health.overall_status.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(health)
    } else {
        HttpResponse::Ok().json(health)
    }
}

async fn ready_handler(state: web::Data<AppState>) -> impl Responder {
    if state.query.is_ready().await {
        HttpResponse::Ok().json(serde_json::json!({ "status": "ready" }))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "hydrating" }))
    }
}

async fn metrics_handler(state: web::Data<AppState>) -> impl Responder {
    match state.metrics.encode() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
