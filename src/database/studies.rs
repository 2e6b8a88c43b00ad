use super::Database;
use crate::models::*;
use anyhow::Result;
use sqlx::Row;

/// Fields accepted when loading a study into the corpus.
#[derive(Debug, Clone, Default)]
pub struct StudyCreate {
    pub pmid: i64,
    pub space: String,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub authors: Option<String>,
    pub year: Option<i64>,
    pub table_num: Option<String>,
}

impl Database {
    pub async fn create_study(&self, payload: &StudyCreate) -> Result<Study> {
        sqlx::query(
            "INSERT INTO studies (pmid, space, doi, title, journal, authors, year, table_num)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(payload.pmid)
        .bind(&payload.space)
        .bind(&payload.doi)
        .bind(&payload.title)
        .bind(&payload.journal)
        .bind(&payload.authors)
        .bind(payload.year)
        .bind(&payload.table_num)
        .execute(&self.pool)
        .await?;

        let study = self
            .get_study(payload.pmid)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Study {} missing after insert", payload.pmid))?;
        Ok(study)
    }

    pub async fn get_study(&self, pmid: i64) -> Result<Option<Study>> {
        let study = sqlx::query_as::<_, Study>(
            "SELECT pmid, space, doi, title, journal, authors, year, table_num, created_at
             FROM studies WHERE pmid = ?",
        )
        .bind(pmid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(study)
    }

    pub async fn list_studies(&self, page: u32, limit: u32) -> Result<(Vec<Study>, i64)> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM studies")
            .fetch_one(&self.pool)
            .await?;

        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let studies = sqlx::query_as::<_, Study>(
            "SELECT pmid, space, doi, title, journal, authors, year, table_num, created_at
             FROM studies ORDER BY pmid LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((studies, total))
    }

    /// Fetch the studies behind a set of spatial matches, preserving each
    /// match's peak count.
    pub async fn get_study_summaries(
        &self,
        activations: &[StudyActivation],
    ) -> Result<Vec<StudySummary>> {
        if activations.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; activations.len()].join(", ");
        let query = format!(
            "SELECT pmid, title, journal, authors, year FROM studies WHERE pmid IN ({})",
            placeholders
        );

        let mut q = sqlx::query(&query);
        for activation in activations {
            q = q.bind(activation.pmid);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let pmid: i64 = row.get("pmid");
            let peaks = activations
                .iter()
                .find(|a| a.pmid == pmid)
                .map(|a| a.peaks)
                .unwrap_or(0);
            summaries.push(StudySummary {
                pmid,
                title: row.get("title"),
                journal: row.get("journal"),
                authors: row.get("authors"),
                year: row.get("year"),
                peaks,
            });
        }
        Ok(summaries)
    }
}
