//! Gene endpoints: expression image download, on-demand decoding against
//! the term reference set, and scatterplots against single features.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use regex::Regex;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{error, warn};

use crate::models::Gene;
use crate::tasks::{JobKind, JobOutcome};
use crate::web::AppState;

/// Gene symbols and feature names feed into file paths; keep them to a
/// conservative character set.
fn validate_token(token: &str) -> Result<(), StatusCode> {
    let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").map_err(|e| {
        error!("Invalid token pattern: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if re.is_match(token) {
        Ok(())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn lookup_gene(state: &AppState, symbol: &str) -> Result<Gene, StatusCode> {
    match state.database.get_gene_by_symbol(symbol).await {
        Ok(Some(gene)) => Ok(gene),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("Gene lookup failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Expression image paths in the gene table may be absolute or relative
/// to the gene image directory.
fn gene_image_file(state: &AppState, gene: &Gene) -> PathBuf {
    let path = std::path::Path::new(&gene.image_file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        state.store.gene_image_path(&gene.image_file)
    }
}

/// `GET /genes/{symbol}/decode`: per-feature decoding correlations for
/// the gene's expression image, generating the decoding on first request.
pub async fn decode(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, StatusCode> {
    validate_token(&symbol)?;
    let gene = lookup_gene(&state, &symbol).await?;

    let decoding = state.store.gene_decoding_path(&gene.symbol);
    if !decoding.exists() {
        let image_file = gene_image_file(&state, &gene);
        match state
            .tasks
            .submit_and_wait(JobKind::DecodeImage {
                image_file: image_file.to_string_lossy().to_string(),
            })
            .await
        {
            Ok(JobOutcome::Completed) => {}
            Ok(JobOutcome::Failed) => warn!(symbol = %gene.symbol, "Gene decoding failed"),
            Err(e) => warn!(symbol = %gene.symbol, "Gene decoding not awaited: {}", e),
        }
    }

    let rows: Vec<Value> = match state.store.read_decoding(&decoding).await {
        Ok(entries) => entries
            .iter()
            .map(|e| json!({ "feature": e.feature, "r": round3(e.r) }))
            .collect(),
        Err(_) => {
            warn!(symbol = %gene.symbol, "Decoding results not available");
            Vec::new()
        }
    };

    Ok(Json(json!({ "data": rows })))
}

/// `GET /genes/{symbol}/image`: the expression image as an attachment.
pub async fn image(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    validate_token(&symbol)?;
    let gene = lookup_gene(&state, &symbol).await?;

    let path = gene_image_file(&state, &gene);
    let bytes = match state.store.read_file(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(symbol = %gene.symbol, "Expression image unreadable: {}", e);
            return Err(StatusCode::NOT_FOUND);
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}_AHBA.nii.gz\"", gene.symbol),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// `GET /genes/{symbol}/scatter/{feature}.png`: scatterplot of the
/// gene's expression against one feature's meta-analysis map, rendered
/// on demand.
pub async fn scatter(
    Path((symbol, file)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    validate_token(&symbol)?;
    let Some(feature) = file.strip_suffix(".png") else {
        return Err(StatusCode::NOT_FOUND);
    };
    validate_token(feature)?;

    let gene = lookup_gene(&state, &symbol).await?;
    let plot = state.store.scatterplot_path(&gene.symbol, feature);

    if !plot.exists() {
        let image_file = gene_image_file(&state, &gene);
        match state
            .tasks
            .submit_and_wait(JobKind::Scatterplot {
                image_file: image_file.to_string_lossy().to_string(),
                feature: feature.to_string(),
                base_id: gene.symbol.clone(),
                gene_masks: true,
            })
            .await
        {
            Ok(JobOutcome::Completed) => {}
            Ok(JobOutcome::Failed) => {
                warn!(symbol = %gene.symbol, feature, "Scatterplot generation failed")
            }
            Err(e) => warn!(symbol = %gene.symbol, feature, "Scatterplot not awaited: {}", e),
        }
    }

    let bytes = match state.store.read_file(&plot).await {
        Ok(bytes) => bytes,
        Err(_) => return Err(StatusCode::NOT_FOUND),
    };

    Ok((
        [(header::CONTENT_TYPE, "image/png".to_string())],
        bytes,
    )
        .into_response())
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
