//! code-search HTTP server
//!
//! Actix-web REST API over the search engine

pub mod error;
pub mod routes;
pub mod state;
pub mod types;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use codesearch_common::{AppConfig, CodeSearchError, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;

use crate::error::ApiError;
use crate::state::AppState;

/// Largest accepted JSON body (batch ingestion)
const JSON_LIMIT: usize = 16 * 1024 * 1024;

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT)
        .error_handler(|err, _req| ApiError(CodeSearchError::invalid_input(err.to_string())).into())
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ApiError(CodeSearchError::invalid_query(err.to_string())).into())
}

/// Bind the listener, then rebuild the index in the background.
///
/// Requests are accepted immediately; `/ready` reports 503 and index
/// operations fail with a retryable error until the rebuild finishes.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let bind_addr = config.server_bind_address();
    let state = Arc::new(AppState::new(config).await?);
    let engine = state.engine.clone();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Cors::permissive())
            .app_data(web::Data::new(state.clone()))
            .app_data(json_config())
            .app_data(query_config())
            .configure(routes::configure)
    })
    .bind(&bind_addr)?
    .run();

    tokio::spawn(async move {
        match engine.start().await {
            Ok(count) => info!("Index rebuild finished: {} documents", count),
            Err(e) => error!("Index rebuild failed, server stays unready: {}", e),
        }
    });

    server.await?;
    info!("HTTP server stopped");
    Ok(())
}
