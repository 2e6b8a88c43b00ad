use super::Database;
use crate::models::Peak;
use anyhow::Result;

impl Database {
    pub async fn create_peak(&self, pmid: i64, x: f64, y: f64, z: f64) -> Result<Peak> {
        let id = sqlx::query("INSERT INTO peaks (pmid, x, y, z) VALUES (?, ?, ?, ?)")
            .bind(pmid)
            .bind(x)
            .bind(y)
            .bind(z)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(Peak { id, pmid, x, y, z })
    }

    pub async fn get_study_peaks(&self, pmid: i64) -> Result<Vec<Peak>> {
        let peaks =
            sqlx::query_as::<_, Peak>("SELECT id, pmid, x, y, z FROM peaks WHERE pmid = ?")
                .bind(pmid)
                .fetch_all(&self.pool)
                .await?;
        Ok(peaks)
    }

    /// All peaks within `radius` mm of the point, Euclidean.
    ///
    /// The bounding-cube prefilter rides the (x, y, z) index; the exact
    /// sphere check runs on the survivors.
    pub async fn peaks_within_radius(
        &self,
        x: f64,
        y: f64,
        z: f64,
        radius: f64,
    ) -> Result<Vec<Peak>> {
        let peaks = sqlx::query_as::<_, Peak>(
            "SELECT id, pmid, x, y, z FROM peaks
             WHERE x BETWEEN ? AND ? AND y BETWEEN ? AND ? AND z BETWEEN ? AND ?
               AND ((x - ?) * (x - ?) + (y - ?) * (y - ?) + (z - ?) * (z - ?)) <= ?",
        )
        .bind(x - radius)
        .bind(x + radius)
        .bind(y - radius)
        .bind(y + radius)
        .bind(z - radius)
        .bind(z + radius)
        .bind(x)
        .bind(x)
        .bind(y)
        .bind(y)
        .bind(z)
        .bind(z)
        .bind(radius * radius)
        .fetch_all(&self.pool)
        .await?;
        Ok(peaks)
    }
}
