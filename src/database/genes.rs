use super::Database;
use crate::models::Gene;
use anyhow::Result;

impl Database {
    pub async fn get_gene_by_symbol(&self, symbol: &str) -> Result<Option<Gene>> {
        let gene = sqlx::query_as::<_, Gene>(
            "SELECT id, symbol, name, image_file FROM genes WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(gene)
    }

    pub async fn create_gene(
        &self,
        symbol: &str,
        name: Option<&str>,
        image_file: &str,
    ) -> Result<Gene> {
        let id = sqlx::query("INSERT INTO genes (symbol, name, image_file) VALUES (?, ?, ?)")
            .bind(symbol)
            .bind(name)
            .bind(image_file)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(Gene {
            id,
            symbol: symbol.to_string(),
            name: name.map(|n| n.to_string()),
            image_file: image_file.to_string(),
        })
    }
}
