use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use codesearch_common::CodeSearchError;
use std::fmt;

use crate::types::ErrorBody;

/// HTTP face of [`CodeSearchError`]
#[derive(Debug)]
pub struct ApiError(pub CodeSearchError);

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<CodeSearchError> for ApiError {
    fn from(e: CodeSearchError) -> Self {
        Self(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            CodeSearchError::InvalidInput(_)
            | CodeSearchError::InvalidQuery(_)
            | CodeSearchError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
            CodeSearchError::NotFound(_) => StatusCode::NOT_FOUND,
            CodeSearchError::EmbeddingUnavailable(_)
            | CodeSearchError::StorageUnavailable(_)
            | CodeSearchError::QueryFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody::from(&self.0))
    }
}
