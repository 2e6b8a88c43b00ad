//! File-backed store for derived brain images and decoding results.
//!
//! Every artifact lives at a path derived deterministically from its input
//! parameters (seed coordinates or a content-derived identifier), so the
//! directories behave as a content-addressed cache: existence of the file
//! answers "has this been computed".

use crate::config::StorageConfig;
use crate::models::DecodingEntry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Clone)]
pub struct ImageStore {
    coactivation_dir: PathBuf,
    connectivity_dir: PathBuf,
    decoding_dir: PathBuf,
    scatterplot_dir: PathBuf,
    gene_dir: PathBuf,
    voxel_dir: PathBuf,
}

impl ImageStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            coactivation_dir: config.coactivation_path.clone(),
            connectivity_dir: config.connectivity_path.clone(),
            decoding_dir: config.decoding_path.clone(),
            scatterplot_dir: config.scatterplot_path.clone(),
            gene_dir: config.gene_path.clone(),
            voxel_dir: config.voxel_path.clone(),
        }
    }

    pub async fn ensure_storage_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [
            &self.coactivation_dir,
            &self.connectivity_dir,
            &self.decoding_dir,
            &self.scatterplot_dir,
            &self.gene_dir,
            &self.voxel_dir,
        ] {
            if !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }
        Ok(())
    }

    /// Meta-analytic coactivation map for a seed point.
    pub fn coactivation_path(&self, x: i64, y: i64, z: i64) -> PathBuf {
        self.coactivation_dir.join(format!(
            "metaanalytic_coactivation_{}_{}_{}_association-test_z_FDR_0.01.nii.gz",
            x, y, z
        ))
    }

    /// Resting-state functional connectivity map for a seed point.
    pub fn connectivity_path(&self, x: i64, y: i64, z: i64) -> PathBuf {
        self.connectivity_dir
            .join(format!("functional_connectivity_{}_{}_{}.nii.gz", x, y, z))
    }

    /// Content-derived identifier for an image's decoding output.
    ///
    /// Gene expression images keep their `gene_{symbol}` identity so the
    /// gene endpoints can address them directly; everything else hashes
    /// the file name.
    pub fn decode_id(image_file: &str) -> String {
        let basename = Path::new(image_file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| image_file.to_string());

        if let Some(rest) = basename.strip_prefix("gene_") {
            let symbol = rest.split('_').next().unwrap_or(rest);
            let symbol = symbol.split('.').next().unwrap_or(symbol);
            format!("gene_{}", symbol)
        } else {
            format!("{:x}", md5::compute(basename.as_bytes()))
        }
    }

    /// Decoding result (tab-separated feature/correlation pairs).
    pub fn decoding_path(&self, decode_id: &str) -> PathBuf {
        self.decoding_dir.join(format!("{}.txt", decode_id))
    }

    pub fn gene_decoding_path(&self, symbol: &str) -> PathBuf {
        self.decoding_path(&format!("gene_{}", symbol))
    }

    pub fn scatterplot_path(&self, base_id: &str, feature: &str) -> PathBuf {
        self.scatterplot_dir
            .join(format!("{}_{}.png", base_id, feature))
    }

    /// Precomputed per-term voxel values at a grid point for a reference
    /// set (tab-separated term, z, pp).
    pub fn voxel_values_path(&self, set: &str, x: i64, y: i64, z: i64) -> PathBuf {
        self.voxel_dir
            .join(format!("{}_{}_{}_{}.txt", set, x, y, z))
    }

    pub fn gene_image_path(&self, file_name: &str) -> PathBuf {
        self.gene_dir.join(file_name)
    }

    pub async fn read_file(&self, path: &Path) -> Result<Vec<u8>, std::io::Error> {
        fs::read(path).await
    }

    /// Parse a decoding result file into feature/correlation pairs.
    /// Malformed lines are skipped.
    pub async fn read_decoding(&self, path: &Path) -> Result<Vec<DecodingEntry>, std::io::Error> {
        let contents = fs::read_to_string(path).await?;
        Ok(parse_decoding(&contents))
    }

    /// Parse a voxel values file into term -> (z, pp).
    pub async fn read_voxel_values(
        &self,
        path: &Path,
    ) -> Result<HashMap<String, (f64, f64)>, std::io::Error> {
        let contents = fs::read_to_string(path).await?;
        Ok(parse_voxel_values(&contents))
    }
}

fn parse_decoding(contents: &str) -> Vec<DecodingEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let feature = fields.next()?.trim();
            let value: f64 = fields.next()?.trim().parse().ok()?;
            if feature.is_empty() {
                return None;
            }
            Some(DecodingEntry {
                feature: feature.to_string(),
                r: value,
            })
        })
        .collect()
}

fn parse_voxel_values(contents: &str) -> HashMap<String, (f64, f64)> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let term = fields.next()?.trim();
            let z: f64 = fields.next()?.trim().parse().ok()?;
            let pp: f64 = fields.next()?.trim().parse().ok()?;
            if term.is_empty() {
                return None;
            }
            Some((term.to_string(), (z, pp)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn store() -> ImageStore {
        ImageStore::new(&StorageConfig {
            coactivation_path: PathBuf::from("/data/coactivation"),
            connectivity_path: PathBuf::from("/data/fcmri"),
            decoding_path: PathBuf::from("/data/decoding"),
            scatterplot_path: PathBuf::from("/data/scatter"),
            gene_path: PathBuf::from("/data/genes"),
            voxel_path: PathBuf::from("/data/voxel"),
        })
    }

    #[test]
    fn test_artifact_paths_are_deterministic() {
        let s = store();
        assert_eq!(
            s.coactivation_path(2, -4, 6),
            PathBuf::from(
                "/data/coactivation/metaanalytic_coactivation_2_-4_6_association-test_z_FDR_0.01.nii.gz"
            )
        );
        assert_eq!(
            s.connectivity_path(0, 0, 0),
            PathBuf::from("/data/fcmri/functional_connectivity_0_0_0.nii.gz")
        );
        assert_eq!(
            s.scatterplot_path("gene_BDNF", "memory"),
            PathBuf::from("/data/scatter/gene_BDNF_memory.png")
        );
        assert_eq!(
            s.voxel_values_path("terms", 2, 4, 6),
            PathBuf::from("/data/voxel/terms_2_4_6.txt")
        );
    }

    #[test]
    fn test_decode_id_for_gene_images() {
        assert_eq!(ImageStore::decode_id("gene_BDNF_AHBA.nii.gz"), "gene_BDNF");
        assert_eq!(ImageStore::decode_id("/some/dir/gene_COMT.nii.gz"), "gene_COMT");
    }

    #[test]
    fn test_decode_id_is_content_derived() {
        let a = ImageStore::decode_id("/x/metaanalytic_coactivation_2_4_6.nii.gz");
        let b = ImageStore::decode_id("/y/metaanalytic_coactivation_2_4_6.nii.gz");
        // Same basename, same identifier, regardless of directory
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let c = ImageStore::decode_id("metaanalytic_coactivation_2_4_8.nii.gz");
        assert_ne!(a, c);
    }

    #[test]
    fn test_parse_decoding_skips_malformed_lines() {
        let parsed = parse_decoding("memory\t0.512\n\nbroken line\npain\t-0.03\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].feature, "memory");
        assert!((parsed[1].r - -0.03).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_voxel_values() {
        let parsed = parse_voxel_values("memory\t1.5\t0.73\npain\t-0.2\t0.44\n");
        assert_eq!(parsed["memory"], (1.5, 0.73));
        assert_eq!(parsed["pain"], (-0.2, 0.44));
    }
}
