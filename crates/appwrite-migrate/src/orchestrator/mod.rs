//! Top-level run coordination: scan, worker lifecycle, execution, teardown.
//!
//! The orchestrator owns everything the executor should not care about:
//! building the two project clients from configuration, deciding whether a
//! cloud worker is worth deploying, falling back to local transfer when the
//! deployment fails, and guaranteeing the worker is deleted exactly once no
//! matter how the run ends. A half-migrated project is recoverable; a
//! forgotten serverless function with embedded API keys is a liability.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::{AppwriteClient, ProjectApi};
use crate::checkpoint::{pair_prefix, CheckpointStore};
use crate::config::{Config, MigrationOptions, ProjectConfig};
use crate::error::{MigrateError, Result};
use crate::executor::{ExecutionSummary, TransferExecutor};
use crate::plan::MigrationPlan;
use crate::scanner::Scanner;
use crate::worker::{WorkerCredentials, WorkerDeployer};

/// Outcome of one completed migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: i64,
    /// Whether file binaries went through the cloud worker.
    pub used_cloud_worker: bool,
    pub summary: ExecutionSummary,
}

impl MigrationResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Coordinates a full migration between two projects.
pub struct Orchestrator {
    source: Arc<dyn ProjectApi>,
    dest: Arc<dyn ProjectApi>,
    checkpoints: Arc<dyn CheckpointStore>,
    source_creds: WorkerCredentials,
    dest_creds: WorkerCredentials,
    use_cloud_proxy: bool,
    cancel: CancellationToken,
}

fn credentials_of(config: &ProjectConfig) -> WorkerCredentials {
    WorkerCredentials {
        endpoint: config.endpoint.trim_end_matches('/').to_string(),
        project_id: config.project_id.clone(),
        api_key: config.api_key.clone(),
    }
}

impl Orchestrator {
    /// Build an orchestrator with live HTTP clients from configuration.
    pub fn from_config(config: &Config, checkpoints: Arc<dyn CheckpointStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_clients(
            Arc::new(AppwriteClient::new(&config.source)),
            Arc::new(AppwriteClient::new(&config.destination)),
            checkpoints,
            credentials_of(&config.source),
            credentials_of(&config.destination),
            config.options.use_cloud_proxy,
        ))
    }

    /// Build an orchestrator over arbitrary [`ProjectApi`] implementations.
    pub fn with_clients(
        source: Arc<dyn ProjectApi>,
        dest: Arc<dyn ProjectApi>,
        checkpoints: Arc<dyn CheckpointStore>,
        source_creds: WorkerCredentials,
        dest_creds: WorkerCredentials,
        use_cloud_proxy: bool,
    ) -> Self {
        Self {
            source,
            dest,
            checkpoints,
            source_creds,
            dest_creds,
            use_cloud_proxy,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for requesting a cooperative stop of the current run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enumerate the source project into an editable plan.
    pub async fn scan(&self, options: &MigrationOptions) -> Result<MigrationPlan> {
        Scanner::new(self.source.clone()).scan(options).await
    }

    /// Whether an earlier run of this migration pair left checkpoints behind.
    pub fn is_resumable(&self) -> Result<bool> {
        self.checkpoints.any_with_prefix(&pair_prefix(
            self.source.project_id(),
            self.dest.project_id(),
        ))
    }

    /// Run the migration described by `plan`.
    ///
    /// Deploys the cloud worker when the plan moves files and the proxy is
    /// enabled; a failed deployment downgrades to local transfer with a
    /// warning instead of aborting. The worker, once deployed, is deleted in
    /// the teardown path whether the run succeeds, fails, or is cancelled.
    pub async fn run(&self, plan: &MigrationPlan, resume: bool) -> Result<MigrationResult> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(
            "Starting migration run {} ({} -> {}, resume: {})",
            run_id,
            self.source.project_id(),
            self.dest.project_id(),
            resume
        );

        let worker_id = if plan.wants_file_transfer() && self.use_cloud_proxy {
            match WorkerDeployer::new(self.dest.clone()).deploy().await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        "Cloud worker unavailable ({}), falling back to local file transfer",
                        e
                    );
                    None
                }
            }
        } else {
            None
        };
        let used_cloud_worker = worker_id.is_some();

        let mut executor = TransferExecutor::new(
            self.source.clone(),
            self.dest.clone(),
            self.checkpoints.clone(),
            self.source_creds.clone(),
            self.dest_creds.clone(),
        )
        .with_cancel_token(self.cancel.child_token());
        if let Some(id) = &worker_id {
            executor = executor.with_worker(id.clone());
        }

        let outcome = executor.execute(plan, resume).await;

        if let Some(id) = &worker_id {
            info!("Tearing down cloud worker {}", id);
            if let Err(e) = self.dest.delete_function(id).await {
                error!(
                    "Failed to delete worker function {}, remove it manually: {}",
                    id, e
                );
            }
        }

        let summary = match outcome {
            Ok(summary) => summary,
            Err(MigrateError::Cancelled) => {
                info!("Run {} cancelled, checkpoints retained for resume", run_id);
                return Err(MigrateError::Cancelled);
            }
            Err(e) => {
                error!("Run {} failed: {}", run_id, e.format_detailed());
                return Err(e);
            }
        };

        let finished_at = Utc::now();
        let result = MigrationResult {
            run_id,
            started_at,
            finished_at,
            duration_secs: (finished_at - started_at).num_seconds(),
            used_cloud_worker,
            summary,
        };
        info!(
            "Migration run {} completed in {}s",
            result.run_id, result.duration_secs
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Bucket, StorageFile};
    use crate::api::MockProjectApi;
    use crate::checkpoint::{checkpoint_key, MemoryCheckpointStore};
    use bytes::Bytes;

    fn creds(project: &str) -> WorkerCredentials {
        WorkerCredentials {
            endpoint: format!("https://{}.example.com/v1", project),
            project_id: project.to_string(),
            api_key: format!("{}-key", project),
        }
    }

    fn orchestrator(
        source: &Arc<MockProjectApi>,
        dest: &Arc<MockProjectApi>,
        store: &Arc<MemoryCheckpointStore>,
        use_cloud_proxy: bool,
    ) -> Orchestrator {
        Orchestrator::with_clients(
            source.clone(),
            dest.clone(),
            store.clone() as Arc<dyn CheckpointStore>,
            creds("src"),
            creds("dst"),
            use_cloud_proxy,
        )
    }

    fn bucket(id: &str) -> Bucket {
        Bucket {
            id: id.to_string(),
            permissions: vec![],
            name: id.to_string(),
            enabled: true,
            file_security: false,
            maximum_file_size: None,
            allowed_file_extensions: vec![],
            compression: None,
            encryption: false,
            antivirus: false,
        }
    }

    fn file(id: &str, bucket_id: &str) -> StorageFile {
        StorageFile {
            id: id.to_string(),
            bucket_id: bucket_id.to_string(),
            permissions: vec![],
            name: format!("{}.bin", id),
            mime_type: "application/octet-stream".to_string(),
            size_original: 1,
        }
    }

    fn storage_options(use_cloud_proxy: bool) -> MigrationOptions {
        MigrationOptions {
            migrate_databases: false,
            migrate_documents: false,
            migrate_functions: false,
            migrate_users: false,
            migrate_teams: false,
            use_cloud_proxy,
            ..MigrationOptions::default()
        }
    }

    fn seed_storage(source: &MockProjectApi) {
        source.add_bucket(bucket("photos"));
        source.add_file("photos", file("img-1", "photos"), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_worker_deployed_and_deleted_exactly_once_on_success() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());
        seed_storage(&source);

        let orch = orchestrator(&source, &dest, &store, true);
        let plan = orch.scan(&storage_options(true)).await.unwrap();
        let result = orch.run(&plan, false).await.unwrap();

        assert!(result.used_cloud_worker);
        assert_eq!(dest.ops_with_prefix("create_function migration-worker-"), 1);
        assert_eq!(dest.ops_with_prefix("delete_function migration-worker-"), 1);
        // Nothing with the worker prefix survives the run.
        let leftover = dest
            .ops()
            .iter()
            .filter(|op| op.starts_with("get_function migration-worker-"))
            .count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_worker_deleted_even_when_run_fails() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());
        seed_storage(&source);
        // The file phase dies on listing, after the worker was deployed.
        source.fail_always("list_files");

        let orch = orchestrator(&source, &dest, &store, true);
        let plan = orch.scan(&storage_options(true)).await.unwrap();
        assert!(orch.run(&plan, false).await.is_err());

        assert_eq!(dest.ops_with_prefix("delete_function migration-worker-"), 1);
    }

    #[tokio::test]
    async fn test_failed_worker_deploy_falls_back_to_local_transfer() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());
        seed_storage(&source);
        dest.fail_always("create_function");

        let orch = orchestrator(&source, &dest, &store, true);
        let plan = orch.scan(&storage_options(true)).await.unwrap();
        let result = orch.run(&plan, false).await.unwrap();

        assert!(!result.used_cloud_worker);
        // The file arrived through the local buffer path.
        assert_eq!(source.ops_with_prefix("download_file photos/img-1"), 1);
        assert_eq!(dest.file_content("photos", "img-1").unwrap(), Bytes::from_static(b"x"));
        // Nothing was deployed, so nothing is torn down.
        assert_eq!(dest.ops_with_prefix("delete_function"), 0);
    }

    #[tokio::test]
    async fn test_no_worker_without_cloud_proxy_option() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());
        seed_storage(&source);

        let orch = orchestrator(&source, &dest, &store, false);
        let plan = orch.scan(&storage_options(false)).await.unwrap();
        let result = orch.run(&plan, false).await.unwrap();

        assert!(!result.used_cloud_worker);
        assert_eq!(dest.ops_with_prefix("create_function"), 0);
        assert_eq!(result.summary.counts("file").created, 1);
    }

    #[tokio::test]
    async fn test_is_resumable_reflects_checkpoints() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        let orch = orchestrator(&source, &dest, &store, false);
        assert!(!orch.is_resumable().unwrap());

        store
            .save(&checkpoint_key("src", "dst", "file", "photos"), "img-1")
            .unwrap();
        assert!(orch.is_resumable().unwrap());

        // Checkpoints of a different pair do not count.
        let other = Arc::new(MockProjectApi::new("elsewhere"));
        let other_orch = orchestrator(&other, &dest, &store, false);
        assert!(!other_orch.is_resumable().unwrap());
    }

    #[tokio::test]
    async fn test_result_serializes_with_counters() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());
        seed_storage(&source);

        let orch = orchestrator(&source, &dest, &store, false);
        let plan = orch.scan(&storage_options(false)).await.unwrap();
        let result = orch.run(&plan, false).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["kinds"]["bucket"]["created"], 1);
        assert_eq!(json["summary"]["kinds"]["file"]["created"], 1);
        assert!(json["run_id"].as_str().unwrap().len() >= 32);
    }

    #[tokio::test]
    async fn test_cancelled_run_propagates_after_teardown() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());
        seed_storage(&source);

        let orch = orchestrator(&source, &dest, &store, true);
        let plan = orch.scan(&storage_options(true)).await.unwrap();
        orch.cancel_token().cancel();

        match orch.run(&plan, false).await {
            Err(MigrateError::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|_| ())),
        }
        // Worker was deployed before the first cancellation check fired, and
        // still torn down.
        assert_eq!(
            dest.ops_with_prefix("create_function migration-worker-"),
            dest.ops_with_prefix("delete_function migration-worker-")
        );
    }
}
