use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use tracing::error;

use crate::models::StudyWithPeaks;
use crate::web::{AppState, PaginationParams, PaginatedResponse};

/// `GET /api/studies/?page=&limit=`
pub async fn list_studies(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Value>, StatusCode> {
    let (page, limit) = (params.page(), params.limit());
    match state.database.list_studies(page, limit).await {
        Ok((studies, total)) => Ok(Json(json!(PaginatedResponse::new(
            studies, total, page, limit
        )))),
        Err(e) => {
            error!("Failed to list studies: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// `GET /api/studies/{pmid}`
pub async fn get_study(
    Path(pmid): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Value>, StatusCode> {
    let study = match state.database.get_study(pmid).await {
        Ok(Some(study)) => study,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Study lookup failed: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let peaks = state.database.get_study_peaks(pmid).await.map_err(|e| {
        error!("Peak lookup failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(json!({ "data": StudyWithPeaks { study, peaks } })))
}
