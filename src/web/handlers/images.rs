use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::web::AppState;

/// `GET /api/images/{id}/download`: serve a derived image as an
/// attachment. A database row whose file has gone missing is a 404, not
/// a server error.
pub async fn download(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    let image = match state.database.get_location_image(id).await {
        Ok(Some(image)) => image,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Image lookup failed: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let path = std::path::Path::new(&image.image_file);
    let bytes = match state.store.read_file(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(image = %image.image_file, "Image file unreadable: {}", e);
            return Err(StatusCode::NOT_FOUND);
        }
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("image_{}.nii.gz", id));

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}
