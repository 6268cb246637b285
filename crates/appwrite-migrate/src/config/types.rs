//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source project connection.
    pub source: ProjectConfig,

    /// Destination project connection.
    pub destination: ProjectConfig,

    /// Migration behavior flags.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// Connection settings for one Appwrite project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// API endpoint, e.g. "https://cloud.appwrite.io/v1".
    pub endpoint: String,

    /// Project identifier.
    pub project_id: String,

    /// Server API key with access to the resources being migrated.
    pub api_key: String,
}

/// Migration behavior flags.
///
/// `migrate_documents` and `migrate_files` control nested content and are
/// independent of the container flags: a plan can copy collection schemas
/// without their documents, or buckets without their files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Migrate databases and collection schemas.
    #[serde(default = "default_true")]
    pub migrate_databases: bool,

    /// Migrate storage buckets.
    #[serde(default = "default_true")]
    pub migrate_storage: bool,

    /// Migrate functions (config, variables, active deployment).
    #[serde(default = "default_true")]
    pub migrate_functions: bool,

    /// Migrate user accounts.
    #[serde(default = "default_true")]
    pub migrate_users: bool,

    /// Migrate teams and memberships.
    #[serde(default = "default_true")]
    pub migrate_teams: bool,

    /// Migrate documents inside collections.
    #[serde(default = "default_true")]
    pub migrate_documents: bool,

    /// Migrate files inside buckets.
    #[serde(default = "default_true")]
    pub migrate_files: bool,

    /// Proxy file binaries through a transient serverless worker deployed to
    /// the destination instead of buffering them locally.
    #[serde(default)]
    pub use_cloud_proxy: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            migrate_databases: true,
            migrate_storage: true,
            migrate_functions: true,
            migrate_users: true,
            migrate_teams: true,
            migrate_documents: true,
            migrate_files: true,
            use_cloud_proxy: false,
        }
    }
}

fn default_true() -> bool {
    true
}
