//! Location API: point lookup with lazy creation, spatial study search,
//! image listings and cross-image comparison at a coordinate.
//!
//! Coordinates live on an even grid. Requests for off-grid coordinates
//! are redirected (302) to the canonical point rather than rejected.

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{error, warn};

use crate::cache::ResponseCache;
use crate::images::ImageStore;
use crate::models::{ImageDescriptor, ImageRef, LocationDetail, LocationImage, LocationSummary};
use crate::spatial::{self, PointQuery};
use crate::web::{AppState, RequestContext};

#[derive(Debug, Deserialize)]
pub struct LocationQueryParams {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub r: Option<i64>,
}

/// `GET /api/locations/?x=&y=&z=&r=`
pub async fn get_location(
    State(state): State<AppState>,
    ctx: RequestContext,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<LocationQueryParams>,
) -> Result<Response, StatusCode> {
    let q = PointQuery::new(
        params.x,
        params.y,
        params.z,
        params.r.unwrap_or(spatial::DEFAULT_RADIUS),
    );
    let raw_query = raw_query.unwrap_or_default();

    if !q.is_canonical() {
        return Ok(redirect_to_canonical_query("/api/locations/", &raw_query, q));
    }

    let key = ResponseCache::cache_key("/api/locations/", &raw_query, ctx.authenticated);
    let compute_state = state.clone();
    let payload = state
        .cache
        .get_or_compute(key, || async move { location_detail(&compute_state, q).await })
        .await
        .map_err(|e| {
            error!("Failed to build location payload: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(payload).into_response())
}

async fn location_detail(state: &AppState, q: PointQuery) -> anyhow::Result<Value> {
    let (location, images) = state.locations.resolve_or_create(q.x, q.y, q.z).await?;

    let peaks = state
        .database
        .peaks_within_radius(q.x as f64, q.y as f64, q.z as f64, q.radius as f64)
        .await?;
    let activations = spatial::group_by_study(&peaks);
    let studies = state.database.get_study_summaries(&activations).await?;

    let detail = LocationDetail {
        x: location.x,
        y: location.y,
        z: location.z,
        r: q.radius,
        images: describe_images(&images),
        studies,
    };
    Ok(json!({ "data": detail }))
}

/// `GET /api/locations/{x_y_z[_r]}/`: summary of studies and any images
/// already attached to the point. Never creates a location.
pub async fn location_summary(
    State(state): State<AppState>,
    Path(val): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, StatusCode> {
    let q: PointQuery = val.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    let peaks = state
        .database
        .peaks_within_radius(q.x as f64, q.y as f64, q.z as f64, q.radius as f64)
        .await
        .map_err(|e| {
            error!("Spatial query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    let activations = spatial::group_by_study(&peaks);

    let images = match state.locations.get(q.x, q.y, q.z).await {
        Ok(Some((_, images))) => images
            .iter()
            .filter(|img| img.display)
            .map(|img| ImageRef {
                id: img.id,
                label: img.label.clone(),
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            error!("Location lookup failed: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    if params.contains_key("draw") {
        let summaries = state
            .database
            .get_study_summaries(&activations)
            .await
            .map_err(|e| {
                error!("Study lookup failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        return Ok(Json(json!({ "data": table_rows(&summaries) })).into_response());
    }

    let summary = LocationSummary {
        studies: activations,
        images,
    };
    Ok(Json(json!({ "data": summary })).into_response())
}

/// `GET /api/locations/{x_y_z[_r]}/studies/`
pub async fn get_studies(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(val): Path<String>,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, StatusCode> {
    let q: PointQuery = val.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let raw_query = raw_query.unwrap_or_default();

    if !q.is_canonical() {
        return Ok(redirect_to_canonical_segment(&q, "studies/", &raw_query));
    }

    let path = format!("/api/locations/{}/studies/", val);
    let key = ResponseCache::cache_key(&path, &raw_query, ctx.authenticated);
    let tabular = params.contains_key("dt");

    let compute_state = state.clone();
    let payload = state
        .cache
        .get_or_compute(key, || async move {
            let peaks = compute_state
                .database
                .peaks_within_radius(q.x as f64, q.y as f64, q.z as f64, q.radius as f64)
                .await?;
            let activations = spatial::group_by_study(&peaks);

            if tabular {
                let summaries = compute_state.database.get_study_summaries(&activations).await?;
                Ok(json!({ "data": table_rows(&summaries) }))
            } else {
                Ok(json!({ "data": activations }))
            }
        })
        .await
        .map_err(|e| {
            error!("Failed to query studies at location: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(payload).into_response())
}

/// `GET /api/locations/{x_y_z[_r]}/images`
pub async fn get_images(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(val): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, StatusCode> {
    let q: PointQuery = val.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let raw_query = raw_query.unwrap_or_default();

    if !q.is_canonical() {
        return Ok(redirect_to_canonical_segment(&q, "images", &raw_query));
    }

    let path = format!("/api/locations/{}/images", val);
    let key = ResponseCache::cache_key(&path, &raw_query, ctx.authenticated);

    let compute_state = state.clone();
    let payload = state
        .cache
        .get_or_compute(key, || async move {
            let (_, images) = compute_state.locations.resolve_or_create(q.x, q.y, q.z).await?;
            Ok(json!({ "data": describe_images(&images) }))
        })
        .await
        .map_err(|e| {
            error!("Failed to list location images: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(payload).into_response())
}

/// `GET /api/locations/{x_y_z[_r]}/compare/?set=`
///
/// Correlation table between the point's coactivation/connectivity
/// decodings and per-term voxel values from the chosen reference set.
pub async fn compare_location(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(val): Path<String>,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, StatusCode> {
    let q: PointQuery = val.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let raw_query = raw_query.unwrap_or_default();

    if !q.is_canonical() {
        return Ok(redirect_to_canonical_segment(&q, "compare/", &raw_query));
    }

    let set = params
        .get("set")
        .cloned()
        .unwrap_or_else(|| "terms_20k".to_string());
    let path = format!("/api/locations/{}/compare/", val);
    let key = ResponseCache::cache_key(&path, &raw_query, ctx.authenticated);

    let compute_state = state.clone();
    let payload = state
        .cache
        .get_or_compute(key, || async move {
            compare_table(&compute_state, q, &set).await
        })
        .await
        .map_err(|e| {
            error!("Failed to build comparison table: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(payload).into_response())
}

async fn compare_table(state: &AppState, q: PointQuery, set: &str) -> anyhow::Result<Value> {
    let (_, images) = state.locations.resolve_or_create(q.x, q.y, q.z).await?;

    let ma = decoding_for(state, &images, |label| label.contains("coactivation")).await;
    let fc = decoding_for(state, &images, |label| label.contains("connectivity")).await;

    // Gene maps are too numerous to slice into; voxel columns stay empty
    let ref_type = set.split('_').next().unwrap_or("terms");
    let voxel = if ref_type != "genes" {
        let path = state.store.voxel_values_path(ref_type, q.x, q.y, q.z);
        match state.store.read_voxel_values(&path).await {
            Ok(values) => values,
            Err(_) => {
                warn!(set = ref_type, x = q.x, y = q.y, z = q.z, "No voxel values available");
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    type Cells = (Option<f64>, Option<f64>, Option<f64>, Option<f64>);
    let mut table: BTreeMap<String, Cells> = BTreeMap::new();
    for (term, (z, pp)) in voxel {
        let entry = table.entry(term).or_default();
        entry.0 = Some(z);
        entry.1 = Some(pp);
    }
    for entry in fc {
        table.entry(entry.feature).or_default().2 = Some(entry.r);
    }
    for entry in ma {
        table.entry(entry.feature).or_default().3 = Some(entry.r);
    }

    let rows: Vec<Value> = table
        .into_iter()
        .map(|(term, (z, pp, fc, ma))| {
            json!([term, cell(z), cell(pp), cell(fc), cell(ma)])
        })
        .collect();
    Ok(json!({ "data": rows }))
}

/// Decoding entries for the first image whose label matches, or empty if
/// the image or its decoding file is not there yet.
async fn decoding_for(
    state: &AppState,
    images: &[LocationImage],
    matches: impl Fn(&str) -> bool,
) -> Vec<crate::models::DecodingEntry> {
    let Some(image) = images
        .iter()
        .find(|img| matches(&img.label.to_lowercase()))
    else {
        return Vec::new();
    };

    let path = state
        .store
        .decoding_path(&ImageStore::decode_id(&image.image_file));
    match state.store.read_decoding(&path).await {
        Ok(entries) => entries,
        Err(_) => {
            warn!(image = %image.image_file, "Decoding results not available");
            Vec::new()
        }
    }
}

fn cell(v: Option<f64>) -> Value {
    match v {
        Some(x) => json!(round2(x)),
        None => json!("-"),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// HTML-table-ready rows: linked title, authors, journal, peak count.
fn table_rows(summaries: &[crate::models::StudySummary]) -> Vec<Value> {
    summaries
        .iter()
        .map(|s| {
            let title = s.title.clone().unwrap_or_else(|| s.pmid.to_string());
            json!([
                format!("<a href=/studies/{}>{}</a>", s.pmid, title),
                s.authors.clone().unwrap_or_default(),
                s.journal.clone().unwrap_or_default(),
                s.peaks,
            ])
        })
        .collect()
}

pub(crate) fn describe_images(images: &[LocationImage]) -> Vec<ImageDescriptor> {
    images
        .iter()
        .filter(|img| img.display)
        .map(describe_image)
        .collect()
}

fn describe_image(image: &LocationImage) -> ImageDescriptor {
    let coactivation = image.label.to_lowercase().contains("coactivation");
    let url = format!("/api/images/{}/download", image.id);
    ImageDescriptor {
        id: image.id,
        name: image.label.clone(),
        color_palette: if coactivation { "yellow" } else { "red" }.to_string(),
        url: url.clone(),
        visible: if coactivation { 0 } else { 1 },
        download: url,
        description: image.description.clone(),
        intent: image.stat.clone(),
        positive_threshold: if coactivation { 0.0 } else { 0.2 },
        negative_threshold: if coactivation { 0.0 } else { -0.2 },
    }
}

/// 302 to the canonical coordinates, keeping every other query parameter.
fn redirect_to_canonical_query(path: &str, raw_query: &str, q: PointQuery) -> Response {
    let canonical = q.canonicalized();
    let replacements = [
        ("x", canonical.x),
        ("y", canonical.y),
        ("z", canonical.z),
    ];

    let mut parts = Vec::new();
    for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match replacements.iter().find(|(k, _)| *k == key) {
            Some((_, replacement)) => parts.push(format!("{}={}", key, replacement)),
            None => parts.push(format!("{}={}", key, value)),
        }
    }

    found(format!("{}?{}", path, parts.join("&")))
}

/// 302 to the same sub-resource under the canonical path segment.
fn redirect_to_canonical_segment(q: &PointQuery, suffix: &str, raw_query: &str) -> Response {
    let mut url = format!("/api/locations/{}/{}", q.canonicalized().segment(), suffix);
    if !raw_query.is_empty() {
        url.push('?');
        url.push_str(raw_query);
    }
    found(url)
}

fn found(url: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.516), 0.52);
        assert_eq!(round2(-0.034), -0.03);
        assert_eq!(round2(1.0), 1.0);
    }

    #[test]
    fn test_cell_formats_missing_as_dash() {
        assert_eq!(cell(None), json!("-"));
        assert_eq!(cell(Some(0.125)), json!(0.13));
    }

    #[test]
    fn test_describe_image_palettes() {
        let image = |label: &str| LocationImage {
            id: 7,
            location_id: 1,
            name: label.to_string(),
            label: label.to_string(),
            image_file: "img.nii.gz".to_string(),
            stat: "z-score".to_string(),
            display: true,
            download: true,
            description: None,
            created_at: chrono::Utc::now(),
        };

        let coactivation = describe_image(&image("Meta-analytic coactivation"));
        assert_eq!(coactivation.color_palette, "yellow");
        assert_eq!(coactivation.visible, 0);
        assert_eq!(coactivation.positive_threshold, 0.0);

        let connectivity = describe_image(&image("Functional connectivity"));
        assert_eq!(connectivity.color_palette, "red");
        assert_eq!(connectivity.visible, 1);
        assert_eq!(connectivity.positive_threshold, 0.2);
        assert_eq!(connectivity.negative_threshold, -0.2);
        assert_eq!(connectivity.url, "/api/images/7/download");
    }

    #[test]
    fn test_hidden_images_are_not_described() {
        let mut img = LocationImage {
            id: 1,
            location_id: 1,
            name: "n".to_string(),
            label: "Functional connectivity".to_string(),
            image_file: "f".to_string(),
            stat: "corr. (r)".to_string(),
            display: false,
            download: false,
            description: None,
            created_at: chrono::Utc::now(),
        };
        assert!(describe_images(std::slice::from_ref(&img)).is_empty());
        img.display = true;
        assert_eq!(describe_images(std::slice::from_ref(&img)).len(), 1);
    }
}
