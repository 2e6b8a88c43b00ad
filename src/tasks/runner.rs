//! Worker loop that executes queued jobs against the external analysis
//! tool and records their outcome in the job registry.

use super::{Job, JobRegistry};
use crate::errors::types::TaskError;
use crate::images::ImageStore;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How many times to probe for the output file after the tool exits.
/// Covers the window where the file is still being flushed/renamed on
/// slow or networked filesystems.
const OUTPUT_PROBES: u32 = 5;

pub struct TaskWorker {
    rx: mpsc::Receiver<Job>,
    registry: JobRegistry,
    store: ImageStore,
    tool_command: String,
    execution_timeout: Duration,
}

impl TaskWorker {
    pub(crate) fn new(
        rx: mpsc::Receiver<Job>,
        registry: JobRegistry,
        store: ImageStore,
        tool_command: String,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            registry,
            store,
            tool_command,
            execution_timeout,
        }
    }

    /// Drain the queue until the service side is dropped.
    pub async fn run(mut self) {
        info!("Task worker started (tool: {})", self.tool_command);
        while let Some(job) = self.rx.recv().await {
            let key = job.kind.key();
            self.registry.mark_running(&key).await;

            let result = self.run_job(&job).await;
            if let Err(ref e) = result {
                warn!(key = %key, job_id = %job.id, "Job failed: {}", e);
            } else {
                info!(key = %key, job_id = %job.id, "Job completed");
            }
            self.registry.finish(&key, result).await;
        }
        info!("Task worker stopped");
    }

    async fn run_job(&self, job: &Job) -> Result<(), TaskError> {
        let key = job.kind.key();
        let output_path = job.kind.output_path(&self.store);

        // Another process may have produced the artifact in the meantime
        if output_path.exists() {
            debug!(key = %key, "Output already present, skipping tool run");
            return Ok(());
        }

        let args = job.kind.command_args(&self.store);
        debug!(key = %key, "Running {} {}", self.tool_command, args.join(" "));

        let child = TokioCommand::new(&self.tool_command)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TaskError::SpawnFailed {
                command: self.tool_command.clone(),
                message: e.to_string(),
            })?;

        let output = tokio::time::timeout(self.execution_timeout, child.wait_with_output())
            .await
            .map_err(|_| TaskError::ExecutionTimeout {
                job: key.clone(),
                seconds: self.execution_timeout.as_secs(),
            })?
            .map_err(|e| TaskError::job_failed(key.clone(), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("no output").to_string();
            return Err(TaskError::job_failed(
                key.clone(),
                format!("exit {}: {}", output.status, detail),
            ));
        }

        self.await_output_file(&key, &output_path).await
    }

    /// Probe for the output file with short jittered sleeps.
    async fn await_output_file(
        &self,
        key: &str,
        path: &std::path::Path,
    ) -> Result<(), TaskError> {
        for _ in 0..OUTPUT_PROBES {
            if path.exists() {
                return Ok(());
            }
            let jitter = 100 + fastrand::u64(..200);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }
        Err(TaskError::OutputMissing {
            job: key.to_string(),
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{StorageConfig, TasksConfig};
    use crate::images::ImageStore;
    use crate::tasks::{JobKind, JobOutcome, JobState, TaskService};
    use std::path::PathBuf;

    fn temp_storage() -> (StorageConfig, PathBuf) {
        let root = std::env::temp_dir().join(format!("neuromap-test-{}", uuid::Uuid::new_v4()));
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

    fn tasks_config(tool: &str) -> TasksConfig {
        TasksConfig {
            tool_command: tool.to_string(),
            execution_timeout_seconds: 5,
            wait_timeout_seconds: 5,
            queue_capacity: 8,
        }
    }

    #[tokio::test]
    async fn test_job_completes_when_output_exists() {
        let (storage, root) = temp_storage();
        let store = ImageStore::new(&storage);
        store.ensure_storage_dirs().await.unwrap();

        // Pre-create the artifact; the worker then skips the tool run
        let kind = JobKind::CoactivationMap { x: 2, y: 4, z: 6 };
        std::fs::write(kind.output_path(&store), b"nifti").unwrap();

        let (service, worker) = TaskService::new(&tasks_config("true"), store);
        tokio::spawn(worker.run());

        let outcome = service.submit_and_wait(kind.clone()).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed);

        let status = service.registry().status(&kind.key()).await.unwrap();
        assert_eq!(status.state, JobState::Completed);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_failed_tool_is_recorded_as_failed() {
        let (storage, root) = temp_storage();
        let store = ImageStore::new(&storage);
        store.ensure_storage_dirs().await.unwrap();

        let (service, worker) = TaskService::new(&tasks_config("false"), store);
        tokio::spawn(worker.run());

        let kind = JobKind::CoactivationMap { x: 0, y: 0, z: 0 };
        let outcome = service.submit_and_wait(kind.clone()).await.unwrap();
        assert_eq!(outcome, JobOutcome::Failed);

        // Failed is distinguishable from pending states in the registry
        let status = service.registry().status(&kind.key()).await.unwrap();
        assert!(matches!(status.state, JobState::Failed { .. }));

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_single_flight_shares_inflight_job() {
        let (storage, root) = temp_storage();
        let store = ImageStore::new(&storage);
        store.ensure_storage_dirs().await.unwrap();

        let kind = JobKind::DecodeImage {
            image_file: "img.nii.gz".to_string(),
        };
        std::fs::write(kind.output_path(&store), b"decoded").unwrap();

        // No worker yet: the first submit stays queued, so the second
        // must attach to it rather than enqueue a duplicate
        let (service, worker) = TaskService::new(&tasks_config("true"), store);

        let first = service.submit(kind.clone()).await.unwrap();
        let queued = service.registry().status(&kind.key()).await.unwrap();
        assert_eq!(queued.state, JobState::Queued);

        let second = service.submit(kind.clone()).await.unwrap();
        let after = service.registry().status(&kind.key()).await.unwrap();
        assert_eq!(after.id, queued.id, "second submit must not replace the job");

        tokio::spawn(worker.run());

        // Both waiters resolve off the same run
        let (a, b) = tokio::join!(
            first.wait(std::time::Duration::from_secs(5)),
            second.wait(std::time::Duration::from_secs(5)),
        );
        assert_eq!(a.unwrap(), JobOutcome::Completed);
        assert_eq!(b.unwrap(), JobOutcome::Completed);

        std::fs::remove_dir_all(root).ok();
    }
}
