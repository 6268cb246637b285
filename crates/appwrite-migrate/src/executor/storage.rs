//! Storage phases: buckets, then file content.
//!
//! File content moves either through the cloud worker (server-side copy, no
//! client bandwidth) or through a local buffer (download then upload). The
//! worker's job payload carries a single bucket ID for both sides, so a
//! bucket whose target ID diverges from its source ID always takes the local
//! path. Both paths produce identical destination state.

use futures::future::join_all;
use tracing::{error, info};

use super::{TransferExecutor, FILE_PAGE_SIZE};
use crate::api::models::StorageFile;
use crate::checkpoint::checkpoint_key;
use crate::error::{MigrateError, Result};
use crate::plan::{MigrationPlan, MigrationResource};
use crate::worker::{TransferJobPayload, WorkerResponse};

impl TransferExecutor {
    pub(crate) async fn phase_buckets(&self, plan: &MigrationPlan) -> Result<()> {
        for bucket in plan.enabled_buckets() {
            self.check_cancelled()?;
            let Some(detail) = Self::bucket_detail(bucket) else {
                continue;
            };
            match self.dest.get_bucket(&bucket.target_id).await {
                Ok(Some(_)) => self.note_skipped("bucket"),
                Ok(None) => {
                    let mut created = detail.clone();
                    created.id = bucket.target_id.clone();
                    created.name = bucket.target_name.clone();
                    match self.dest.create_bucket(&created).await {
                        Ok(()) => self.note_created("bucket"),
                        Err(e) => {
                            error!("Failed to create bucket {}: {}", bucket.target_id, e);
                            self.note_failed("bucket");
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to look up bucket {}: {}", bucket.target_id, e);
                    self.note_failed("bucket");
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn phase_files(&self, plan: &MigrationPlan, resume: bool) -> Result<()> {
        for bucket in plan.enabled_buckets() {
            self.copy_bucket_files(bucket, resume).await?;
        }
        Ok(())
    }

    async fn copy_bucket_files(&self, bucket: &MigrationResource, resume: bool) -> Result<()> {
        let key = checkpoint_key(
            self.source.project_id(),
            self.dest.project_id(),
            "file",
            &bucket.target_id,
        );
        let mut cursor = if resume { self.checkpoints.get(&key)? } else { None };
        if let Some(c) = &cursor {
            info!("Resuming files of bucket {} after {}", bucket.target_id, c);
        }

        loop {
            self.check_cancelled()?;
            let page = self
                .source
                .list_files(&bucket.source_id, FILE_PAGE_SIZE, cursor.as_deref())
                .await?;
            if page.files.is_empty() {
                break;
            }

            let results = join_all(page.files.iter().map(|file| self.copy_file(bucket, file))).await;

            for (file, outcome) in page.files.iter().zip(results) {
                match outcome {
                    Ok(true) => self.note_created("file"),
                    Ok(false) => self.note_skipped("file"),
                    Err(e) => {
                        error!(
                            "Failed to copy file {}/{}: {}",
                            bucket.target_id, file.id, e
                        );
                        self.note_failed("file");
                    }
                }
                self.checkpoints.save(&key, &file.id)?;
            }

            let fetched = page.files.len();
            cursor = page.files.last().map(|f| f.id.clone());
            if fetched < FILE_PAGE_SIZE as usize {
                break;
            }
        }
        Ok(())
    }

    async fn copy_file(&self, bucket: &MigrationResource, file: &StorageFile) -> Result<bool> {
        if self
            .dest
            .get_file(&bucket.target_id, &file.id)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        match &self.worker_id {
            Some(worker_id) if bucket.source_id == bucket.target_id => {
                self.copy_file_via_worker(worker_id, &bucket.source_id, &file.id)
                    .await?
            }
            _ => self.copy_file_via_buffer(bucket, file).await?,
        }
        Ok(true)
    }

    /// Server-side copy: one synchronous worker invocation per file.
    async fn copy_file_via_worker(
        &self,
        worker_id: &str,
        bucket_id: &str,
        file_id: &str,
    ) -> Result<()> {
        let payload = TransferJobPayload {
            source: self.source_creds.clone(),
            destination: self.dest_creds.clone(),
            bucket_id: bucket_id.to_string(),
            file_id: file_id.to_string(),
        };
        let execution = self
            .dest
            .execute_function(worker_id, serde_json::to_string(&payload)?)
            .await?;

        let response: WorkerResponse =
            serde_json::from_str(&execution.response_body).map_err(|_| {
                MigrateError::WorkerExecution(format!(
                    "malformed worker response: {}",
                    execution.response_body
                ))
            })?;
        if response.success {
            Ok(())
        } else {
            Err(MigrateError::WorkerExecution(
                response.error.unwrap_or_else(|| "unknown worker error".to_string()),
            ))
        }
    }

    /// Local-buffer copy: download the full content, then re-upload it.
    async fn copy_file_via_buffer(
        &self,
        bucket: &MigrationResource,
        file: &StorageFile,
    ) -> Result<()> {
        let data = self
            .source
            .download_file(&bucket.source_id, &file.id)
            .await?;
        self.dest
            .upload_file(
                &bucket.target_id,
                &file.id,
                &file.name,
                data,
                &file.permissions,
            )
            .await
    }
}
