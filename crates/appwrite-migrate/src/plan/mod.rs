//! Migration plan: the editable tree of resources slated for transfer.
//!
//! A plan is a read-only snapshot of source state built by the scanner. The
//! caller (UI layer) may rename targets and toggle `enabled` before execution
//! starts; a disabled node excludes itself and every descendant from all
//! phases. The plan itself is never persisted - resumption re-supplies an
//! equivalent plan and fast-forwards from stored checkpoint cursors.

use serde::{Deserialize, Serialize};

use crate::api::models::{Bucket, Collection, Database, Function, Team, User};
use crate::config::MigrationOptions;

/// Top-level categories the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Database,
    Collection,
    Bucket,
    Function,
    Team,
    User,
}

impl ResourceKind {
    /// Stable identifier used in checkpoint keys and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::Collection => "collection",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Function => "function",
            ResourceKind::Team => "team",
            ResourceKind::User => "user",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full source descriptor captured at scan time, used to reconstruct the
/// resource in the destination without re-querying the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDetail {
    Database(Database),
    Collection(Collection),
    Bucket(Bucket),
    Function(Function),
    Team(Team),
    User(User),
}

/// A node in the plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResource {
    pub kind: ResourceKind,

    /// Identifier in the source project.
    pub source_id: String,

    /// Identifier in the destination; user-editable, may diverge from
    /// `source_id`. Uniqueness within kind and parent scope is the caller's
    /// responsibility.
    pub target_id: String,

    pub source_name: String,

    /// Display name in the destination; user-editable.
    pub target_name: String,

    /// Disabled nodes are skipped entirely, including their children.
    pub enabled: bool,

    /// Child resources (collections nested under a database). Empty for
    /// leaf kinds.
    #[serde(default)]
    pub children: Vec<MigrationResource>,

    /// Snapshot of the full source descriptor.
    pub detail: ResourceDetail,
}

impl MigrationResource {
    pub fn new(kind: ResourceKind, id: &str, name: &str, detail: ResourceDetail) -> Self {
        Self {
            kind,
            source_id: id.to_string(),
            target_id: id.to_string(),
            source_name: name.to_string(),
            target_name: name.to_string(),
            enabled: true,
            children: Vec::new(),
            detail,
        }
    }

    /// Enabled children of this node. Children of a disabled node are never
    /// visited, regardless of their own flags.
    pub fn enabled_children(&self) -> impl Iterator<Item = &MigrationResource> {
        self.children.iter().filter(|c| c.enabled)
    }
}

/// The root aggregate: parallel sequences of resources per kind plus the
/// behavior flags. Immutable once execution begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(default)]
    pub databases: Vec<MigrationResource>,
    #[serde(default)]
    pub buckets: Vec<MigrationResource>,
    #[serde(default)]
    pub functions: Vec<MigrationResource>,
    #[serde(default)]
    pub teams: Vec<MigrationResource>,
    #[serde(default)]
    pub users: Vec<MigrationResource>,
    pub options: MigrationOptions,
}

impl MigrationPlan {
    pub fn new(options: MigrationOptions) -> Self {
        Self {
            databases: Vec::new(),
            buckets: Vec::new(),
            functions: Vec::new(),
            teams: Vec::new(),
            users: Vec::new(),
            options,
        }
    }

    pub fn enabled_databases(&self) -> impl Iterator<Item = &MigrationResource> {
        self.databases.iter().filter(|r| r.enabled)
    }

    pub fn enabled_buckets(&self) -> impl Iterator<Item = &MigrationResource> {
        self.buckets.iter().filter(|r| r.enabled)
    }

    pub fn enabled_functions(&self) -> impl Iterator<Item = &MigrationResource> {
        self.functions.iter().filter(|r| r.enabled)
    }

    pub fn enabled_teams(&self) -> impl Iterator<Item = &MigrationResource> {
        self.teams.iter().filter(|r| r.enabled)
    }

    pub fn enabled_users(&self) -> impl Iterator<Item = &MigrationResource> {
        self.users.iter().filter(|r| r.enabled)
    }

    /// Whether any file migration work is requested, which is what decides
    /// if a cloud worker is worth deploying.
    pub fn wants_file_transfer(&self) -> bool {
        self.options.migrate_storage
            && self.options.migrate_files
            && self.buckets.iter().any(|b| b.enabled)
    }

    /// Total number of enabled nodes, counting nested collections.
    pub fn enabled_count(&self) -> usize {
        let nested: usize = self
            .enabled_databases()
            .map(|db| db.enabled_children().count())
            .sum();
        self.enabled_databases().count()
            + self.enabled_buckets().count()
            + self.enabled_functions().count()
            + self.enabled_teams().count()
            + self.enabled_users().count()
            + nested
    }
}
