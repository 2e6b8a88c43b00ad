use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use tracing::error;

use crate::web::{AppState, PaginationParams, PaginatedResponse};

/// `GET /api/features/?page=&limit=`
pub async fn list_features(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Value>, StatusCode> {
    let (page, limit) = (params.page(), params.limit());
    match state.database.list_features(page, limit).await {
        Ok((features, total)) => Ok(Json(json!(PaginatedResponse::new(
            features, total, page, limit
        )))),
        Err(e) => {
            error!("Failed to list features: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
