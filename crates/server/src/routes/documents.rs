use actix_web::{delete, get, post, web, HttpResponse};
use codesearch_vector::IngestStatus;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{
    BatchIngestRequest, BatchIngestResponse, BatchItem, DeleteResponse, ErrorBody, IngestRequest,
};

#[post("/documents")]
pub async fn ingest_document(
    req: web::Json<IngestRequest>,
    state: web::Data<Arc<AppState>>,
) -> actix_web::Result<HttpResponse> {
    let doc = req.into_inner().into_document();
    let outcome = state.engine.ingest(doc).await.map_err(ApiError)?;

    if outcome.status == IngestStatus::Created {
        Ok(HttpResponse::Created().json(outcome))
    } else {
        Ok(HttpResponse::Ok().json(outcome))
    }
}

#[post("/documents/batch")]
pub async fn ingest_batch(
    req: web::Json<BatchIngestRequest>,
    state: web::Data<Arc<AppState>>,
) -> actix_web::Result<HttpResponse> {
    let docs = req
        .into_inner()
        .documents
        .into_iter()
        .map(IngestRequest::into_document)
        .collect();

    let results = state.engine.ingest_many(docs).await.map_err(ApiError)?;

    let items: Vec<BatchItem> = results
        .into_iter()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(outcome) => BatchItem {
                index,
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => BatchItem {
                index,
                outcome: None,
                error: Some(ErrorBody::from(&e)),
            },
        })
        .collect();
    let failed = items.iter().filter(|i| i.error.is_some()).count();

    Ok(HttpResponse::Ok().json(BatchIngestResponse {
        succeeded: items.len() - failed,
        failed,
        items,
    }))
}

#[get("/documents/{id}")]
pub async fn get_document(
    id: web::Path<String>,
    state: web::Data<Arc<AppState>>,
) -> actix_web::Result<HttpResponse> {
    let record = state.engine.get(&id).await.map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(record))
}

#[delete("/documents/{id}")]
pub async fn delete_document(
    id: web::Path<String>,
    state: web::Data<Arc<AppState>>,
) -> actix_web::Result<HttpResponse> {
    let id = id.into_inner();
    let deleted = state.engine.delete(&id).await.map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(DeleteResponse { id, deleted }))
}
