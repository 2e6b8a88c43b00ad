//! Spatial query primitives: coordinate canonicalization, search radius
//! handling and grouping of peak matches by owning study.

use crate::models::{Peak, StudyActivation};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Search radius applied when a request does not specify one, in mm.
pub const DEFAULT_RADIUS: i64 = 6;

/// Hard ceiling on the search radius, in mm. Keeps sphere queries fast.
pub const MAX_RADIUS: i64 = 20;

/// Clamp a requested radius into the supported range.
pub fn clamp_radius(radius: i64) -> i64 {
    radius.clamp(0, MAX_RADIUS)
}

/// Round a coordinate to the nearest multiple of 2, ties to even.
///
/// Canonical grid points live on even coordinates only; this is the single
/// place that rounding rule is defined.
pub fn canonical_coordinate(v: i64) -> i64 {
    ((v as f64 / 2.0).round_ties_even() as i64) * 2
}

/// Canonicalize a coordinate triple. Idempotent.
pub fn canonicalize(x: i64, y: i64, z: i64) -> (i64, i64, i64) {
    (
        canonical_coordinate(x),
        canonical_coordinate(y),
        canonical_coordinate(z),
    )
}

/// A parsed point query: coordinates plus clamped search radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointQuery {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub radius: i64,
}

impl PointQuery {
    pub fn new(x: i64, y: i64, z: i64, radius: i64) -> Self {
        Self {
            x,
            y,
            z,
            radius: clamp_radius(radius),
        }
    }

    /// Whether the coordinates already sit on the canonical grid.
    pub fn is_canonical(&self) -> bool {
        canonicalize(self.x, self.y, self.z) == (self.x, self.y, self.z)
    }

    pub fn canonicalized(&self) -> Self {
        let (x, y, z) = canonicalize(self.x, self.y, self.z);
        Self { x, y, z, radius: self.radius }
    }

    /// Path-segment form used by the location routes.
    pub fn segment(&self) -> String {
        format!("{}_{}_{}_{}", self.x, self.y, self.z, self.radius)
    }
}

impl FromStr for PointQuery {
    type Err = crate::errors::types::WebError;

    /// Parse an `x_y_z` or `x_y_z_r` path segment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::errors::types::WebError::InvalidSegment {
            segment: s.to_string(),
        };

        let parts: Vec<&str> = s.split('_').collect();
        if parts.len() != 3 && parts.len() != 4 {
            return Err(invalid());
        }

        let mut values = Vec::with_capacity(4);
        for part in &parts {
            values.push(part.parse::<i64>().map_err(|_| invalid())?);
        }
        let radius = if values.len() == 4 {
            values[3]
        } else {
            DEFAULT_RADIUS
        };

        Ok(Self::new(values[0], values[1], values[2], radius))
    }
}

/// Group raw peak matches by owning study.
///
/// Peaks of the same study sharing identical coordinates after rounding to
/// 2 decimals are counted once, guarding against duplicate rows in the
/// peak store. Output order follows first appearance in the input, which
/// callers must not rely on.
pub fn group_by_study(peaks: &[Peak]) -> Vec<StudyActivation> {
    let mut seen: HashSet<(i64, i64, i64, i64)> = HashSet::new();
    let mut counts: HashMap<i64, i64> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();

    for peak in peaks {
        let key = (
            peak.pmid,
            round2_key(peak.x),
            round2_key(peak.y),
            round2_key(peak.z),
        );
        if !seen.insert(key) {
            continue;
        }
        if !counts.contains_key(&peak.pmid) {
            order.push(peak.pmid);
        }
        *counts.entry(peak.pmid).or_insert(0) += 1;
    }

    order
        .into_iter()
        .map(|pmid| StudyActivation {
            pmid,
            peaks: counts[&pmid],
        })
        .collect()
}

/// Hashable representation of a coordinate rounded to 2 decimals.
fn round2_key(v: f64) -> i64 {
    (v * 100.0).round() as i64
}
