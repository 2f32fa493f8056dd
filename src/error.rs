use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

use crate::drafts::StoreError;
use crate::search::SearchError;

/// Errors surfaced by HTTP handlers as `{ "error": ... }` bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("a generation run is already in progress")]
    RunInProgress,
    #[error("Failed to fetch data from Eslite API")]
    Upstream(#[from] SearchError),
    #[error("draft storage failed: {0}")]
    Store(#[from] StoreError),
    #[error("generation task failed")]
    Task(#[from] JoinError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RunInProgress => StatusCode::CONFLICT,
            ApiError::Upstream(_) | ApiError::Store(_) | ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Upstream(cause) => error!("❌ Search API error: {}", cause),
            ApiError::Store(cause) => error!("❌ Draft storage error: {}", cause),
            ApiError::Task(cause) => error!("❌ Generation task error: {}", cause),
            _ => {}
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
