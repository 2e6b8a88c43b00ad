use super::Database;
use crate::models::{Location, LocationImage, LocationImageSpec};
use anyhow::Result;

impl Database {
    pub async fn get_location(&self, x: i64, y: i64, z: i64) -> Result<Option<Location>> {
        let location = sqlx::query_as::<_, Location>(
            "SELECT id, x, y, z, created_at FROM locations WHERE x = ? AND y = ? AND z = ?",
        )
        .bind(x)
        .bind(y)
        .bind(z)
        .fetch_optional(&self.pool)
        .await?;
        Ok(location)
    }

    /// Insert the location if it is new, then return the stored row.
    ///
    /// `ON CONFLICT DO NOTHING` plus the re-read makes concurrent creators
    /// from other processes converge on a single row.
    pub async fn create_location(&self, x: i64, y: i64, z: i64) -> Result<Location> {
        sqlx::query(
            "INSERT INTO locations (x, y, z) VALUES (?, ?, ?)
             ON CONFLICT(x, y, z) DO NOTHING",
        )
        .bind(x)
        .bind(y)
        .bind(z)
        .execute(&self.pool)
        .await?;

        let location = self
            .get_location(x, y, z)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Location ({}, {}, {}) missing after insert", x, y, z))?;
        Ok(location)
    }

    pub async fn get_location_images(&self, location_id: i64) -> Result<Vec<LocationImage>> {
        let images = sqlx::query_as::<_, LocationImage>(
            "SELECT id, location_id, name, label, image_file, stat, display, download,
                    description, created_at
             FROM location_images WHERE location_id = ? ORDER BY id",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(images)
    }

    pub async fn get_location_image(&self, id: i64) -> Result<Option<LocationImage>> {
        let image = sqlx::query_as::<_, LocationImage>(
            "SELECT id, location_id, name, label, image_file, stat, display, download,
                    description, created_at
             FROM location_images WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(image)
    }

    pub async fn create_location_image(
        &self,
        location_id: i64,
        spec: &LocationImageSpec,
    ) -> Result<LocationImage> {
        let id = sqlx::query(
            "INSERT INTO location_images
                 (location_id, name, label, image_file, stat, display, download, description)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(location_id)
        .bind(&spec.name)
        .bind(&spec.label)
        .bind(&spec.image_file)
        .bind(&spec.stat)
        .bind(spec.display)
        .bind(spec.download)
        .bind(&spec.description)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        let image = self
            .get_location_image(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Location image {} missing after insert", id))?;
        Ok(image)
    }
}
