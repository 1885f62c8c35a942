pub mod documents;
pub mod search;
pub mod system;

use actix_web::web;

/// Register every route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(documents::ingest_batch)
        .service(documents::ingest_document)
        .service(documents::get_document)
        .service(documents::delete_document)
        .service(search::search)
        .service(search::search_text)
        .service(system::health)
        .service(system::ready)
        .service(system::stats);
}
