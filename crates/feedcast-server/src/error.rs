use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use feedcast_core::ValidationError;
use feedcast_store::StoreError;

/// Request failures surfaced to HTTP clients. Every variant maps to 400.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (
            status,
            Json(json!({ "status": status.as_u16(), "data": self.to_string() })),
        )
            .into_response()
    }
}
