use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use feedcast_core::NewRecord;

use crate::error::ServerError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub title: String,
    pub content: String,
}

/// `POST /add`: validate and store one record.
pub async fn add_handler(
    State(state): State<AppState>,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServerError> {
    let Json(req) = body.map_err(|rejection| ServerError::BadRequest(rejection.body_text()))?;

    let new = NewRecord::new(req.title, req.content);
    new.validate()?;

    // The repo call is a short blocking SQLite write under a mutex.
    let records = state.records.clone();
    let record = tokio::task::spawn_blocking(move || records.insert(&new))
        .await
        .map_err(|e| ServerError::BadRequest(format!("insert task failed: {e}")))??;

    tracing::info!(record_id = %record.id, "record stored");
    Ok(Json(json!({
        "status": 200,
        "data": { "insertedId": record.id },
    })))
}

/// `GET /health`: 200 when the store answers a ping, 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping() {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy" })),
            )
        }
    }
}
