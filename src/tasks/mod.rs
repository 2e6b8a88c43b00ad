//! Asynchronous image-processing jobs.
//!
//! The service wraps an external analysis tool behind an in-process queue.
//! Jobs are keyed by their parameters; submitting a key that is already
//! queued or running returns a handle to the in-flight job instead of
//! enqueueing a duplicate (single-flight). Completion is observed by the
//! caller re-checking the job's deterministic output file.

use crate::config::TasksConfig;
use crate::errors::types::TaskError;
use crate::images::ImageStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

pub mod runner;

pub use runner::TaskWorker;

/// A unit of work for the external analysis tool.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    /// Meta-analytic coactivation map seeded at a grid point.
    CoactivationMap { x: i64, y: i64, z: i64 },
    /// Correlate an image against the term reference set.
    DecodeImage { image_file: String },
    /// Scatterplot of an image against one feature's meta-analysis map.
    Scatterplot {
        image_file: String,
        feature: String,
        base_id: String,
        gene_masks: bool,
    },
}

impl JobKind {
    /// Single-flight key: identical parameters collapse onto one job.
    pub fn key(&self) -> String {
        match self {
            JobKind::CoactivationMap { x, y, z } => format!("coactivation:{}_{}_{}", x, y, z),
            JobKind::DecodeImage { image_file } => {
                format!("decode:{}", ImageStore::decode_id(image_file))
            }
            JobKind::Scatterplot {
                base_id, feature, ..
            } => format!("scatter:{}_{}", base_id, feature),
        }
    }

    /// Where the finished artifact will appear.
    pub fn output_path(&self, store: &ImageStore) -> PathBuf {
        match self {
            JobKind::CoactivationMap { x, y, z } => store.coactivation_path(*x, *y, *z),
            JobKind::DecodeImage { image_file } => {
                store.decoding_path(&ImageStore::decode_id(image_file))
            }
            JobKind::Scatterplot {
                base_id, feature, ..
            } => store.scatterplot_path(base_id, feature),
        }
    }

    /// Arguments handed to the external analysis tool.
    pub fn command_args(&self, store: &ImageStore) -> Vec<String> {
        let out = self.output_path(store).to_string_lossy().to_string();
        match self {
            JobKind::CoactivationMap { x, y, z } => vec![
                "coactivation".to_string(),
                "--x".to_string(),
                x.to_string(),
                "--y".to_string(),
                y.to_string(),
                "--z".to_string(),
                z.to_string(),
                "--out".to_string(),
                out,
            ],
            JobKind::DecodeImage { image_file } => vec![
                "decode".to_string(),
                "--image".to_string(),
                image_file.clone(),
                "--out".to_string(),
                out,
            ],
            JobKind::Scatterplot {
                image_file,
                feature,
                gene_masks,
                ..
            } => {
                let mut args = vec![
                    "scatter".to_string(),
                    "--image".to_string(),
                    image_file.clone(),
                    "--feature".to_string(),
                    feature.clone(),
                    "--out".to_string(),
                    out,
                ];
                if *gene_masks {
                    args.push("--gene-masks".to_string());
                }
                args
            }
        }
    }
}

/// Lifecycle of a job as recorded in the registry.
///
/// `Failed` is kept distinct from the pending states so observers can tell
/// "not generated yet" from "generation broke"; responses degrade the same
/// way for both.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct JobStatus {
    pub id: Uuid,
    pub key: String,
    pub state: JobState,
    pub queued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal outcome broadcast to waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

#[derive(Debug)]
pub(crate) struct Job {
    pub id: Uuid,
    pub kind: JobKind,
}

struct RegistryEntry {
    status: JobStatus,
    notify: broadcast::Sender<JobOutcome>,
}

/// Shared job-state registry. One entry per job key; terminal entries are
/// replaced when the key is submitted again.
#[derive(Clone)]
pub struct JobRegistry {
    entries: Arc<RwLock<HashMap<String, RegistryEntry>>>,
}

impl JobRegistry {
    fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn status(&self, key: &str) -> Option<JobStatus> {
        let entries = self.entries.read().await;
        entries.get(key).map(|e| e.status.clone())
    }

    pub(crate) async fn mark_running(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.status.state = JobState::Running;
            entry.status.updated_at = Utc::now();
        }
    }

    pub(crate) async fn finish(&self, key: &str, result: Result<(), TaskError>) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            let outcome = match result {
                Ok(()) => {
                    entry.status.state = JobState::Completed;
                    JobOutcome::Completed
                }
                Err(e) => {
                    entry.status.state = JobState::Failed {
                        error: e.to_string(),
                    };
                    JobOutcome::Failed
                }
            };
            entry.status.updated_at = Utc::now();
            let _ = entry.notify.send(outcome);
        }
    }
}

/// Handle to an in-flight job.
pub struct JobTicket {
    key: String,
    receiver: broadcast::Receiver<JobOutcome>,
}

impl JobTicket {
    /// Wait for the job's terminal outcome, giving up after `timeout`.
    /// Giving up does not cancel the job.
    pub async fn wait(mut self, timeout: Duration) -> Result<JobOutcome, TaskError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(TaskError::QueueClosed),
            Err(_) => Err(TaskError::WaitTimeout {
                job: self.key,
                seconds: timeout.as_secs(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct TaskService {
    tx: mpsc::Sender<Job>,
    registry: JobRegistry,
    wait_timeout: Duration,
}

impl TaskService {
    /// Build the service plus the worker that drains its queue. The caller
    /// spawns the worker.
    pub fn new(config: &TasksConfig, store: ImageStore) -> (Self, TaskWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let registry = JobRegistry::new();

        let worker = TaskWorker::new(
            rx,
            registry.clone(),
            store,
            config.tool_command.clone(),
            Duration::from_secs(config.execution_timeout_seconds),
        );

        (
            Self {
                tx,
                registry,
                wait_timeout: Duration::from_secs(config.wait_timeout_seconds),
            },
            worker,
        )
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Enqueue a job, or attach to the identical job already in flight.
    pub async fn submit(&self, kind: JobKind) -> Result<JobTicket, TaskError> {
        let key = kind.key();

        let mut entries = self.registry.entries.write().await;
        if let Some(entry) = entries.get(&key) {
            if matches!(entry.status.state, JobState::Queued | JobState::Running) {
                return Ok(JobTicket {
                    key,
                    receiver: entry.notify.subscribe(),
                });
            }
        }

        let id = Uuid::new_v4();
        let (notify, receiver) = broadcast::channel(4);
        let now = Utc::now();
        entries.insert(
            key.clone(),
            RegistryEntry {
                status: JobStatus {
                    id,
                    key: key.clone(),
                    state: JobState::Queued,
                    queued_at: now,
                    updated_at: now,
                },
                notify,
            },
        );
        drop(entries);

        match self.tx.try_send(Job { id, kind }) {
            Ok(()) => Ok(JobTicket { key, receiver }),
            Err(e) => {
                // Queue full or closed: record the failure so the entry is terminal
                warn!(key = %key, "Failed to enqueue job: {}", e);
                self.registry
                    .finish(&key, Err(TaskError::QueueClosed))
                    .await;
                Err(TaskError::QueueClosed)
            }
        }
    }

    /// Submit and block (bounded) until the job reaches a terminal state.
    pub async fn submit_and_wait(&self, kind: JobKind) -> Result<JobOutcome, TaskError> {
        let ticket = self.submit(kind).await?;
        ticket.wait(self.wait_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use std::path::PathBuf;

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
    fn test_job_keys_collapse_identical_parameters() {
        let a = JobKind::CoactivationMap { x: 2, y: 4, z: 6 };
        let b = JobKind::CoactivationMap { x: 2, y: 4, z: 6 };
        let c = JobKind::CoactivationMap { x: 2, y: 4, z: 8 };
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_decode_jobs_key_on_content_identifier() {
        let a = JobKind::DecodeImage {
            image_file: "/one/img.nii.gz".to_string(),
        };
        let b = JobKind::DecodeImage {
            image_file: "/two/img.nii.gz".to_string(),
        };
        // Same basename means same decoding output, so same key
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_output_paths_match_store_layout() {
        let store = store();
        let kind = JobKind::CoactivationMap { x: 0, y: -2, z: 4 };
        assert_eq!(kind.output_path(&store), store.coactivation_path(0, -2, 4));

        let kind = JobKind::Scatterplot {
            image_file: "gene_BDNF_AHBA.nii.gz".to_string(),
            feature: "memory".to_string(),
            base_id: "gene_BDNF".to_string(),
            gene_masks: true,
        };
        assert_eq!(
            kind.output_path(&store),
            store.scatterplot_path("gene_BDNF", "memory")
        );
        assert!(kind
            .command_args(&store)
            .contains(&"--gene-masks".to_string()));
    }
}
