//! Corpus loading: studies with their activation peaks, the feature
//! vocabulary, and the study/feature frequency joins.
//!
//! Input is a JSON dump of studies plus a whitespace-separated feature
//! matrix (header row of feature names, then one row per study: pmid
//! followed by per-feature frequencies). Feature aggregates
//! (`num_studies`, `num_activations`) are maintained here, at load time.

use crate::database::studies::StudyCreate;
use crate::database::Database;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// How often to log loading progress, in studies.
const PROGRESS_INTERVAL: usize = 100;

#[derive(Debug, Deserialize)]
pub struct StudyRecord {
    #[serde(alias = "id")]
    pub pmid: i64,
    pub space: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub authors: Option<String>,
    pub year: Option<i64>,
    pub table_num: Option<String>,
    #[serde(default)]
    pub peaks: Vec<[f64; 3]>,
}

#[derive(Debug, Deserialize)]
pub struct GeneRecord {
    pub symbol: String,
    pub name: Option<String>,
    pub image_file: String,
}

#[derive(Debug, Default)]
pub struct LoadSummary {
    pub studies: usize,
    pub peaks: usize,
    pub features: usize,
    pub frequencies: usize,
}

pub async fn load_corpus(
    db: &Database,
    studies_path: &Path,
    features_path: &Path,
) -> Result<LoadSummary> {
    let mut summary = LoadSummary::default();

    let (feature_names, frequencies_by_pmid) = parse_feature_matrix(features_path).await?;

    // Create the feature vocabulary first; aggregates start at zero
    let mut feature_ids = HashMap::new();
    for name in &feature_names {
        let feature = db.create_feature(name).await?;
        feature_ids.insert(name.clone(), feature.id);
    }
    summary.features = feature_names.len();
    info!("Loaded {} features", summary.features);

    let contents = tokio::fs::read_to_string(studies_path)
        .await
        .with_context(|| format!("Reading {}", studies_path.display()))?;
    let records: Vec<StudyRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("Parsing {}", studies_path.display()))?;

    let total = records.len();
    for (index, record) in records.into_iter().enumerate() {
        let peak_count = record.peaks.len();
        let study = db
            .create_study(&StudyCreate {
                pmid: record.pmid,
                space: record.space.unwrap_or_else(|| "UNKNOWN".to_string()),
                doi: record.doi,
                title: record.title,
                journal: record.journal,
                authors: record.authors,
                year: record.year,
                table_num: record.table_num,
            })
            .await?;

        for [x, y, z] in &record.peaks {
            db.create_peak(study.pmid, *x, *y, *z).await?;
        }
        summary.peaks += peak_count;

        // Map features onto the study where the frequency is non-zero
        if let Some(frequencies) = frequencies_by_pmid.get(&study.pmid) {
            for (name, frequency) in feature_names.iter().zip(frequencies) {
                if *frequency > 0.0 {
                    let feature_id = feature_ids[name];
                    db.create_frequency(study.pmid, feature_id, *frequency)
                        .await?;
                    db.bump_feature_counts(feature_id, 1, peak_count as i64)
                        .await?;
                    summary.frequencies += 1;
                }
            }
        } else {
            warn!(pmid = study.pmid, "Study has no row in the feature matrix");
        }

        summary.studies += 1;
        if (index + 1) % PROGRESS_INTERVAL == 0 {
            info!("Loaded {}/{} studies", index + 1, total);
        }
    }

    info!(
        "Corpus loaded: {} studies, {} peaks, {} features, {} frequencies",
        summary.studies, summary.peaks, summary.features, summary.frequencies
    );
    Ok(summary)
}

pub async fn load_genes(db: &Database, genes_path: &Path) -> Result<usize> {
    let contents = tokio::fs::read_to_string(genes_path)
        .await
        .with_context(|| format!("Reading {}", genes_path.display()))?;
    let records: Vec<GeneRecord> = serde_json::from_str(&contents)?;

    let mut loaded = 0;
    for record in &records {
        db.create_gene(&record.symbol, record.name.as_deref(), &record.image_file)
            .await?;
        loaded += 1;
    }
    info!("Loaded {} genes", loaded);
    Ok(loaded)
}

/// Parse the feature matrix: a header row naming the features, then one
/// row per study of pmid followed by frequencies.
async fn parse_feature_matrix(path: &Path) -> Result<(Vec<String>, HashMap<i64, Vec<f64>>)> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Reading {}", path.display()))?;

    let mut lines = contents.lines();
    let header = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("Feature matrix is empty"))?;
    // First header column labels the pmid column
    let feature_names: Vec<String> = header
        .split_whitespace()
        .skip(1)
        .map(|s| s.to_string())
        .collect();

    let mut by_pmid = HashMap::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let pmid: i64 = fields
            .next()
            .ok_or_else(|| anyhow::anyhow!("Missing pmid on line {}", line_no + 2))?
            .parse()
            .with_context(|| format!("Bad pmid on line {}", line_no + 2))?;

        let values: Vec<f64> = fields
            .map(|f| f.parse::<f64>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("Bad frequency on line {}", line_no + 2))?;

        if values.len() != feature_names.len() {
            anyhow::bail!(
                "Line {} has {} frequencies, expected {}",
                line_no + 2,
                values.len(),
                feature_names.len()
            );
        }
        by_pmid.insert(pmid, values);
    }

    Ok((feature_names, by_pmid))
}
