//! Source project enumeration into an editable migration plan.

use std::sync::Arc;
use tracing::{info, warn};

use crate::api::ProjectApi;
use crate::config::MigrationOptions;
use crate::error::Result;
use crate::plan::{MigrationPlan, MigrationResource, ResourceDetail, ResourceKind};

/// First-page size per resource category. Scanning does not paginate past
/// this: a project with more than `SCAN_PAGE_SIZE` top-level resources of one
/// kind is only partially planned. Known limitation, logged when hit.
pub const SCAN_PAGE_SIZE: u32 = 100;

/// Read-only scanner building a [`MigrationPlan`] from a source project.
pub struct Scanner {
    source: Arc<dyn ProjectApi>,
}

impl Scanner {
    pub fn new(source: Arc<dyn ProjectApi>) -> Self {
        Self { source }
    }

    /// Enumerate the source project per the enabled option flags.
    ///
    /// Purely read-only; any listing error propagates and no partial plan is
    /// returned.
    pub async fn scan(&self, options: &MigrationOptions) -> Result<MigrationPlan> {
        let mut plan = MigrationPlan::new(options.clone());

        if options.migrate_databases {
            plan.databases = self.scan_databases().await?;
        }
        if options.migrate_storage {
            plan.buckets = self.scan_buckets().await?;
        }
        if options.migrate_functions {
            plan.functions = self.scan_functions().await?;
        }
        if options.migrate_teams {
            plan.teams = self.scan_teams().await?;
        }
        if options.migrate_users {
            plan.users = self.scan_users().await?;
        }

        info!(
            "Scan complete: {} databases, {} buckets, {} functions, {} teams, {} users",
            plan.databases.len(),
            plan.buckets.len(),
            plan.functions.len(),
            plan.teams.len(),
            plan.users.len()
        );

        Ok(plan)
    }

    async fn scan_databases(&self) -> Result<Vec<MigrationResource>> {
        let list = self.source.list_databases(SCAN_PAGE_SIZE).await?;
        self.warn_truncated("databases", list.total, list.databases.len());

        let mut nodes = Vec::with_capacity(list.databases.len());
        for database in list.databases {
            let mut node = MigrationResource::new(
                ResourceKind::Database,
                &database.id,
                &database.name,
                ResourceDetail::Database(database.clone()),
            );

            let collections = self
                .source
                .list_collections(&database.id, SCAN_PAGE_SIZE)
                .await?;
            self.warn_truncated(
                &format!("collections of {}", database.id),
                collections.total,
                collections.collections.len(),
            );

            node.children = collections
                .collections
                .into_iter()
                .map(|collection| {
                    let (id, name) = (collection.id.clone(), collection.name.clone());
                    MigrationResource::new(
                        ResourceKind::Collection,
                        &id,
                        &name,
                        ResourceDetail::Collection(collection),
                    )
                })
                .collect();

            nodes.push(node);
        }
        Ok(nodes)
    }

    async fn scan_buckets(&self) -> Result<Vec<MigrationResource>> {
        let list = self.source.list_buckets(SCAN_PAGE_SIZE).await?;
        self.warn_truncated("buckets", list.total, list.buckets.len());

        Ok(list
            .buckets
            .into_iter()
            .map(|bucket| {
                let (id, name) = (bucket.id.clone(), bucket.name.clone());
                MigrationResource::new(ResourceKind::Bucket, &id, &name, ResourceDetail::Bucket(bucket))
            })
            .collect())
    }

    async fn scan_functions(&self) -> Result<Vec<MigrationResource>> {
        let list = self.source.list_functions(SCAN_PAGE_SIZE).await?;
        self.warn_truncated("functions", list.total, list.functions.len());

        Ok(list
            .functions
            .into_iter()
            .map(|function| {
                let (id, name) = (function.id.clone(), function.name.clone());
                MigrationResource::new(
                    ResourceKind::Function,
                    &id,
                    &name,
                    ResourceDetail::Function(function),
                )
            })
            .collect())
    }

    async fn scan_teams(&self) -> Result<Vec<MigrationResource>> {
        let list = self.source.list_teams(SCAN_PAGE_SIZE).await?;
        self.warn_truncated("teams", list.total, list.teams.len());

        Ok(list
            .teams
            .into_iter()
            .map(|team| {
                let (id, name) = (team.id.clone(), team.name.clone());
                MigrationResource::new(ResourceKind::Team, &id, &name, ResourceDetail::Team(team))
            })
            .collect())
    }

    async fn scan_users(&self) -> Result<Vec<MigrationResource>> {
        let list = self.source.list_users(SCAN_PAGE_SIZE).await?;
        self.warn_truncated("users", list.total, list.users.len());

        Ok(list
            .users
            .into_iter()
            .map(|user| {
                let (id, name) = (user.id.clone(), user.name.clone());
                MigrationResource::new(ResourceKind::User, &id, &name, ResourceDetail::User(user))
            })
            .collect())
    }

    fn warn_truncated(&self, what: &str, total: u64, fetched: usize) {
        if total > fetched as u64 {
            warn!(
                "Source has {} {} but only the first {} are planned (single-page scan)",
                total, what, fetched
            );
        }
    }
}
