//! Transient cloud worker: a serverless function deployed to the destination
//! project that copies one file server-side per invocation, keeping file
//! binaries off the client's network path.
//!
//! The worker's source (entrypoint + manifest) is synthesized as in-memory
//! text and shipped as a gzipped tar archive - never read from disk. Its
//! upload step deliberately uses a raw multipart request against the storage
//! REST endpoint because the SDK's chunked upload helper corrupts binary
//! payloads in serverless runtimes.
//!
//! Teardown is the orchestrator's job, not this module's: a deployed worker
//! must be deleted exactly once regardless of how the run ends.

mod template;

pub use template::{worker_entrypoint, worker_manifest, WORKER_ENTRYPOINT_PATH};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::ProjectApi;
use crate::error::{MigrateError, Result};

/// Poll interval for deployment build status.
const DEPLOY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Maximum polls before the build is declared dead (~60s).
const DEPLOY_POLL_ATTEMPTS: u32 = 30;

/// Worker function execution timeout. A single-file copy should never take
/// longer; the short bound also limits damage from a hung transfer.
const WORKER_TIMEOUT_SECS: u64 = 15;

const WORKER_RUNTIME: &str = "node-18.0";

/// One file-copy job, serialized as the worker invocation body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferJobPayload {
    pub source: WorkerCredentials,
    pub destination: WorkerCredentials,
    pub bucket_id: String,
    pub file_id: String,
}

/// Connection credentials the worker uses for one side of the copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCredentials {
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
}

/// Envelope the worker returns as its response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Deploys the transient worker function into the destination project.
pub struct WorkerDeployer {
    dest: Arc<dyn ProjectApi>,
}

impl WorkerDeployer {
    pub fn new(dest: Arc<dyn ProjectApi>) -> Self {
        Self { dest }
    }

    /// Create, deploy, and build the worker; returns its function ID once a
    /// deployment reaches "ready".
    ///
    /// Any failure here maps to [`MigrateError::WorkerDeploy`], which callers
    /// treat as "cloud proxy unavailable - fall back to local transfer".
    pub async fn deploy(&self) -> Result<String> {
        let function_id = format!("migration-worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        info!("Deploying cloud worker function {}", function_id);

        let function = crate::api::models::Function {
            id: function_id.clone(),
            name: "Migration file transfer worker".to_string(),
            runtime: WORKER_RUNTIME.to_string(),
            execute: Vec::new(),
            events: Vec::new(),
            schedule: String::new(),
            timeout: WORKER_TIMEOUT_SECS,
            enabled: true,
            logging: false,
            entrypoint: WORKER_ENTRYPOINT_PATH.to_string(),
            commands: "npm install".to_string(),
            deployment: String::new(),
            installation_id: String::new(),
            provider_repository_id: String::new(),
            provider_branch: String::new(),
            provider_root_directory: String::new(),
            provider_silent_mode: false,
        };

        self.dest
            .create_function(&function)
            .await
            .map_err(|e| MigrateError::WorkerDeploy(format!("create function: {}", e)))?;

        let archive = build_code_archive()?;
        let deployment = self
            .dest
            .create_deployment(
                &function_id,
                archive,
                WORKER_ENTRYPOINT_PATH,
                "npm install",
                true,
            )
            .await
            .map_err(|e| MigrateError::WorkerDeploy(format!("create deployment: {}", e)))?;

        self.wait_until_ready(&function_id, &deployment.id).await?;
        info!("Cloud worker {} is ready", function_id);
        Ok(function_id)
    }

    /// Poll the deployment build until it reaches a terminal status.
    async fn wait_until_ready(&self, function_id: &str, deployment_id: &str) -> Result<()> {
        for attempt in 1..=DEPLOY_POLL_ATTEMPTS {
            let deployment = self
                .dest
                .get_deployment(function_id, deployment_id)
                .await
                .map_err(|e| MigrateError::WorkerDeploy(format!("poll deployment: {}", e)))?
                .ok_or_else(|| {
                    MigrateError::WorkerDeploy(format!("deployment {} disappeared", deployment_id))
                })?;

            debug!(
                "Worker deployment {} status: {} (attempt {}/{})",
                deployment_id, deployment.status, attempt, DEPLOY_POLL_ATTEMPTS
            );

            match deployment.status.as_str() {
                "ready" => return Ok(()),
                "failed" => {
                    return Err(MigrateError::WorkerDeploy(format!(
                        "deployment {} build failed",
                        deployment_id
                    )));
                }
                _ => tokio::time::sleep(DEPLOY_POLL_INTERVAL).await,
            }
        }

        Err(MigrateError::WorkerDeploy(format!(
            "deployment {} not ready after {} attempts",
            deployment_id, DEPLOY_POLL_ATTEMPTS
        )))
    }
}

/// Pack the synthesized worker sources into an in-memory tar.gz, the archive
/// format the deployments endpoint expects.
pub fn build_code_archive() -> Result<Bytes> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    append_text(&mut builder, WORKER_ENTRYPOINT_PATH, &worker_entrypoint())?;
    append_text(&mut builder, "package.json", &worker_manifest())?;

    let encoder = builder.into_inner()?;
    let compressed = encoder.finish()?;
    Ok(Bytes::from(compressed))
}

fn append_text<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    content: &str,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content.as_bytes())?;
    Ok(())
}
