use actix_web::{get, post, web, HttpResponse};
use codesearch_vector::Query;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{SearchQuery, SearchRequest};

#[post("/search")]
pub async fn search(
    req: web::Json<SearchRequest>,
    state: web::Data<Arc<AppState>>,
) -> actix_web::Result<HttpResponse> {
    let query = req.into_inner().into_query().map_err(ApiError)?;
    let response = state.engine.query(query).await.map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(response))
}

/// Text-only shortcut: `GET /search?q=...&k=...`
#[get("/search")]
pub async fn search_text(
    query: web::Query<SearchQuery>,
    state: web::Data<Arc<AppState>>,
) -> actix_web::Result<HttpResponse> {
    let SearchQuery { q, k } = query.into_inner();
    let response = state
        .engine
        .query(Query::text(q, k))
        .await
        .map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(response))
}
