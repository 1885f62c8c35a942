use actix_web::{get, web, HttpResponse};
use std::sync::Arc;

use crate::state::AppState;
use crate::types::StatsResponse;

/// Liveness. Always 200 while the process serves requests; never waits
/// on the embedder or the store.
#[get("/health")]
pub async fn health() -> actix_web::Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Readiness: 503 until the startup index rebuild has finished
#[get("/ready")]
pub async fn ready(state: web::Data<Arc<AppState>>) -> actix_web::Result<HttpResponse> {
    let ready = state.engine.is_ready();
    let body = serde_json::json!({ "ready": ready });
    if ready {
        Ok(HttpResponse::Ok().json(body))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(body))
    }
}

/// Index statistics plus an embedder probe bounded by the embed timeout
#[get("/stats")]
pub async fn stats(state: web::Data<Arc<AppState>>) -> actix_web::Result<HttpResponse> {
    let response = StatsResponse {
        stats: state.engine.stats().await,
        embedder_healthy: state.engine.embedder_healthy().await,
    };
    Ok(HttpResponse::Ok().json(response))
}
