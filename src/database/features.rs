use super::Database;
use crate::models::Feature;
use anyhow::Result;

impl Database {
    pub async fn create_feature(&self, name: &str) -> Result<Feature> {
        let id = sqlx::query("INSERT INTO features (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(Feature {
            id,
            name: name.to_string(),
            num_studies: 0,
            num_activations: 0,
        })
    }

    pub async fn get_feature_by_name(&self, name: &str) -> Result<Option<Feature>> {
        let feature = sqlx::query_as::<_, Feature>(
            "SELECT id, name, num_studies, num_activations FROM features WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feature)
    }

    pub async fn list_features(&self, page: u32, limit: u32) -> Result<(Vec<Feature>, i64)> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM features")
            .fetch_one(&self.pool)
            .await?;

        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let features = sqlx::query_as::<_, Feature>(
            "SELECT id, name, num_studies, num_activations
             FROM features ORDER BY name LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((features, total))
    }

    pub async fn create_frequency(
        &self,
        pmid: i64,
        feature_id: i64,
        frequency: f64,
    ) -> Result<()> {
        sqlx::query("INSERT INTO frequencies (pmid, feature_id, frequency) VALUES (?, ?, ?)")
            .bind(pmid)
            .bind(feature_id)
            .bind(frequency)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bump the load-time aggregates after mapping a feature onto a study.
    pub async fn bump_feature_counts(
        &self,
        feature_id: i64,
        studies: i64,
        activations: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE features
             SET num_studies = num_studies + ?, num_activations = num_activations + ?
             WHERE id = ?",
        )
        .bind(studies)
        .bind(activations)
        .bind(feature_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
