//! Location resolution: canonical grid points and their derived images.
//!
//! Locations are created lazily on first access. Creation probes the
//! image store for precomputed artifacts, generates the coactivation map
//! through the task layer when it is missing, and submits a decode job
//! for every image it attaches. Concurrent first-requests for the same
//! coordinate coalesce on a per-coordinate lock so creation and job
//! submission happen once.

use crate::database::Database;
use crate::errors::types::AppError;
use crate::images::ImageStore;
use crate::models::{Location, LocationImage, LocationImageSpec};
use crate::spatial;
use crate::tasks::{JobKind, JobOutcome, TaskService};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

type CoordinateKey = (i64, i64, i64);

#[derive(Clone)]
pub struct LocationService {
    db: Database,
    store: ImageStore,
    tasks: TaskService,
    creation_locks: Arc<Mutex<HashMap<CoordinateKey, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LocationService {
    pub fn new(db: Database, store: ImageStore, tasks: TaskService) -> Self {
        Self {
            db,
            store,
            tasks,
            creation_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Look up a location without creating it.
    pub async fn get(
        &self,
        x: i64,
        y: i64,
        z: i64,
    ) -> Result<Option<(Location, Vec<LocationImage>)>, AppError> {
        let Some(location) = self.db.get_location(x, y, z).await.map_err(internal)? else {
            return Ok(None);
        };
        let images = self
            .db
            .get_location_images(location.id)
            .await
            .map_err(internal)?;
        Ok(Some((location, images)))
    }

    /// Fetch the location for a coordinate triple, creating it on first
    /// access. Coordinates are canonicalized here as a last line of
    /// defense: an odd-coordinate location is never stored.
    pub async fn resolve_or_create(
        &self,
        x: i64,
        y: i64,
        z: i64,
    ) -> Result<(Location, Vec<LocationImage>), AppError> {
        let (x, y, z) = spatial::canonicalize(x, y, z);

        if let Some(found) = self.get(x, y, z).await? {
            return Ok(found);
        }

        let lock = self.creation_lock((x, y, z));
        let _guard = lock.lock().await;

        // Another request may have finished creation while we waited
        if let Some(found) = self.get(x, y, z).await? {
            return Ok(found);
        }

        let created = self.make_location(x, y, z).await;

        // Drop the per-coordinate entry; late arrivals re-check the store
        self.creation_locks
            .lock()
            .expect("creation lock map poisoned")
            .remove(&(x, y, z));

        created
    }

    fn creation_lock(&self, key: CoordinateKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.creation_locks.lock().expect("creation lock map poisoned");
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn make_location(
        &self,
        x: i64,
        y: i64,
        z: i64,
    ) -> Result<(Location, Vec<LocationImage>), AppError> {
        info!(x, y, z, "Creating location");

        // Generate the coactivation map if no precomputed file exists.
        // A failed or timed-out job degrades to "no image" below.
        let coactivation = self.store.coactivation_path(x, y, z);
        if !coactivation.exists() {
            match self
                .tasks
                .submit_and_wait(JobKind::CoactivationMap { x, y, z })
                .await
            {
                Ok(JobOutcome::Completed) => {}
                Ok(JobOutcome::Failed) => {
                    warn!(x, y, z, "Coactivation map generation failed")
                }
                Err(e) => warn!(x, y, z, "Coactivation map not awaited: {}", e),
            }
        }

        let location = self.db.create_location(x, y, z).await.map_err(internal)?;

        let mut images = Vec::new();
        if coactivation.exists() {
            let spec = coactivation_image_spec(x, y, z, &coactivation);
            let image = self
                .db
                .create_location_image(location.id, &spec)
                .await
                .map_err(internal)?;
            images.push(image);
        } else {
            debug!(x, y, z, "No coactivation image available");
        }

        let connectivity = self.store.connectivity_path(x, y, z);
        if connectivity.exists() {
            let spec = connectivity_image_spec(x, y, z, &connectivity);
            let image = self
                .db
                .create_location_image(location.id, &spec)
                .await
                .map_err(internal)?;
            images.push(image);
        }

        // Decode every attached image; waiters poll the decoding file later
        let submissions = images.iter().map(|image| {
            self.tasks.submit(JobKind::DecodeImage {
                image_file: image.image_file.clone(),
            })
        });
        for result in join_all(submissions).await {
            if let Err(e) = result {
                warn!(x, y, z, "Decode submission failed: {}", e);
            }
        }

        Ok((location, images))
    }
}

fn coactivation_image_spec(
    x: i64,
    y: i64,
    z: i64,
    path: &std::path::Path,
) -> LocationImageSpec {
    LocationImageSpec {
        name: format!("Meta-analytic coactivation for seed ({}, {}, {})", x, y, z),
        label: "Meta-analytic coactivation".to_string(),
        image_file: path.to_string_lossy().to_string(),
        stat: "z-score".to_string(),
        display: true,
        download: true,
        description: Some(
            "Regions coactivated with the seed across all studies in the \
             database. Reflects meta-analytic coactivation rather than time \
             series-based connectivity."
                .to_string(),
        ),
    }
}

fn connectivity_image_spec(
    x: i64,
    y: i64,
    z: i64,
    path: &std::path::Path,
) -> LocationImageSpec {
    LocationImageSpec {
        name: format!("Functional connectivity for seed ({}, {}, {})", x, y, z),
        label: "Functional connectivity".to_string(),
        image_file: path.to_string_lossy().to_string(),
        stat: "corr. (r)".to_string(),
        display: true,
        download: true,
        description: Some(
            "Resting-state functional connectivity for the seed region, \
             estimated from a 1,000-subject reference sample."
                .to_string(),
        ),
    }
}

fn internal(e: anyhow::Error) -> AppError {
    AppError::internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, StorageConfig, TasksConfig};

    async fn memory_db() -> Database {
        let db = Database::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: Some(1),
        })
        .await
        .unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn temp_storage() -> (StorageConfig, std::path::PathBuf) {
        let root = std::env::temp_dir().join(format!("neuromap-loc-{}", uuid::Uuid::new_v4()));
        let config = StorageConfig {
            coactivation_path: root.join("coactivation"),
            connectivity_path: root.join("fcmri"),
            decoding_path: root.join("decoding"),
            scatterplot_path: root.join("scatter"),
            gene_path: root.join("genes"),
            voxel_path: root.join("voxel"),
        };
        (config, root)
    }

    async fn service() -> (LocationService, std::path::PathBuf) {
        let db = memory_db().await;
        let (storage, root) = temp_storage();
        let store = ImageStore::new(&storage);
        store.ensure_storage_dirs().await.unwrap();

        let (tasks, worker) = TaskService::new(
            &TasksConfig {
                tool_command: "true".to_string(),
                execution_timeout_seconds: 5,
                wait_timeout_seconds: 2,
                queue_capacity: 8,
            },
            store.clone(),
        );
        tokio::spawn(worker.run());

        (LocationService::new(db, store, tasks), root)
    }

    #[tokio::test]
    async fn test_odd_coordinates_never_create_odd_locations() {
        let (service, root) = service().await;

        let (location, _) = service.resolve_or_create(5, 5, 5).await.unwrap();
        assert_eq!((location.x, location.y, location.z), (4, 4, 4));
        assert_eq!(location.x % 2, 0);

        // The odd triple itself was never stored
        assert!(service.get(5, 5, 5).await.unwrap().is_none());

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_precomputed_images_are_attached() {
        let (service, root) = service().await;

        let coactivation = service.store().coactivation_path(2, 4, 6);
        std::fs::write(&coactivation, b"nifti").unwrap();
        let connectivity = service.store().connectivity_path(2, 4, 6);
        std::fs::write(&connectivity, b"nifti").unwrap();

        let (_, images) = service.resolve_or_create(2, 4, 6).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].label, "Meta-analytic coactivation");
        assert_eq!(images[1].label, "Functional connectivity");
        assert!(images.iter().all(|i| i.display));

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_missing_artifacts_degrade_to_no_images() {
        let (service, root) = service().await;

        // Tool succeeds but produces nothing; the image is simply omitted
        let (location, images) = service.resolve_or_create(0, 0, 0).await.unwrap();
        assert!(images.is_empty());
        assert_eq!((location.x, location.y, location.z), (0, 0, 0));

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_concurrent_first_access_creates_once() {
        let (service, root) = service().await;

        let (a, b) = tokio::join!(
            service.resolve_or_create(8, 8, 8),
            service.resolve_or_create(8, 8, 8),
        );
        let (loc_a, _) = a.unwrap();
        let (loc_b, _) = b.unwrap();
        assert_eq!(loc_a.id, loc_b.id);

        // Exactly one coactivation job was submitted for the coordinate
        let key = JobKind::CoactivationMap { x: 8, y: 8, z: 8 }.key();
        assert!(service.tasks.registry().status(&key).await.is_some());

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let (service, root) = service().await;

        let (first, _) = service.resolve_or_create(2, -4, 6).await.unwrap();
        let (second, _) = service.resolve_or_create(2, -4, 6).await.unwrap();
        assert_eq!(first.id, second.id);

        std::fs::remove_dir_all(root).ok();
    }
}
