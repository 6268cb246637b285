//! # appwrite-migrate
//!
//! Cross-project migration engine for Appwrite.
//!
//! This library copies the contents of one Appwrite project into another
//! through the public REST API, with support for:
//!
//! - **Full resource coverage**: databases, collections, attributes, indexes,
//!   documents, storage buckets, files, functions, users, and teams
//! - **Editable plans**: scan first, then rename or exclude resources before
//!   anything is written
//! - **Resume capability** via durable per-resource checkpoints
//! - **Cloud-proxied file transfer** through a transient serverless worker,
//!   with automatic fallback to local buffering
//! - **Idempotent re-runs**: existing destination resources are skipped, not
//!   duplicated
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use appwrite_migrate::{Config, FileCheckpointStore, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> appwrite_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let checkpoints = Arc::new(FileCheckpointStore::open("checkpoints.json")?);
//!     let orchestrator = Orchestrator::from_config(&config, checkpoints)?;
//!
//!     let plan = orchestrator.scan(&config.options).await?;
//!     let result = orchestrator.run(&plan, false).await?;
//!     println!("{}", result.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod scanner;
pub mod worker;

// Re-exports for convenient access
pub use api::{AppwriteClient, MockProjectApi, ProjectApi};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{Config, MigrationOptions, ProjectConfig};
pub use error::{MigrateError, Result};
pub use executor::{ExecutionSummary, KindCounts, TransferExecutor};
pub use orchestrator::{MigrationResult, Orchestrator};
pub use plan::{MigrationPlan, MigrationResource, ResourceDetail, ResourceKind};
pub use scanner::Scanner;
pub use worker::{TransferJobPayload, WorkerCredentials, WorkerDeployer, WorkerResponse};
