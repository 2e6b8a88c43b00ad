use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A published paper contributing activation coordinates to the corpus.
///
/// `pmid` and `space` are the only required fields; everything
/// bibliographic is optional and may be absent in older corpus dumps.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Study {
    pub pmid: i64,
    pub space: String,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub authors: Option<String>,
    pub year: Option<i64>,
    pub table_num: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A single reported activation coordinate. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Peak {
    pub id: i64,
    pub pmid: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A term associated with studies via frequency of occurrence.
/// `num_studies` and `num_activations` are maintained at corpus load time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feature {
    pub id: i64,
    pub name: String,
    pub num_studies: i64,
    pub num_activations: i64,
}

/// Join row between a study and a feature carrying the term frequency.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Frequency {
    pub pmid: i64,
    pub feature_id: i64,
    pub frequency: f64,
}

/// A canonical even-coordinate grid point with cached derived images.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Location {
    pub id: i64,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub created_at: DateTime<Utc>,
}

/// A derived artifact tied to one location. Read-only after creation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocationImage {
    pub id: i64,
    pub location_id: i64,
    pub name: String,
    pub label: String,
    pub image_file: String,
    pub stat: String,
    pub display: bool,
    pub download: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Metadata for an image about to be attached to a location.
///
/// Explicit record instead of ad hoc key/value metadata: `description` is
/// the only optional field.
#[derive(Debug, Clone)]
pub struct LocationImageSpec {
    pub name: String,
    pub label: String,
    pub image_file: String,
    pub stat: String,
    pub display: bool,
    pub download: bool,
    pub description: Option<String>,
}

/// A gene with an expression image derived from the Allen Brain Atlas data.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Gene {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
    pub image_file: String,
}

/// One study's contribution to a spatial query: how many of its peaks fell
/// inside the search sphere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyActivation {
    pub pmid: i64,
    pub peaks: i64,
}

/// Study fields surfaced alongside a location lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySummary {
    pub pmid: i64,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub authors: Option<String>,
    pub year: Option<i64>,
    pub peaks: i64,
}

/// Viewer-facing descriptor for a derived image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub id: i64,
    pub name: String,
    pub color_palette: String,
    pub url: String,
    pub visible: i64,
    pub download: String,
    pub description: Option<String>,
    pub intent: String,
    pub positive_threshold: f64,
    pub negative_threshold: f64,
}

/// A single feature/correlation pair from a decoding result file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodingEntry {
    pub feature: String,
    pub r: f64,
}

/// Full payload for `GET /api/locations/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationDetail {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub r: i64,
    pub images: Vec<ImageDescriptor>,
    pub studies: Vec<StudySummary>,
}

/// Summary payload for `GET /api/locations/{x_y_z}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSummary {
    pub studies: Vec<StudyActivation>,
    pub images: Vec<ImageRef>,
}

/// Minimal image reference used in the location summary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: i64,
    pub label: String,
}

/// A study returned with its peaks attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyWithPeaks {
    #[serde(flatten)]
    pub study: Study,
    pub peaks: Vec<Peak>,
}
