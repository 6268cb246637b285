//! Transfer executor: the dependency-ordered migration walk.
//!
//! Phases run strictly in order because later phases have referential
//! dependencies on earlier ones: collections need their database, relationship
//! attributes need their sibling collections, documents need attributes,
//! indexes need attribute keys. Within a phase, items from one listed page are
//! dispatched concurrently and awaited as a batch before the cursor advances -
//! intra-page fan-out, inter-page serialization - which caps in-flight work at
//! one page's worth as a deliberate throttle on the destination API.
//!
//! Failure discipline: a single document/file/attribute/membership failure is
//! logged with identifying context and skipped; a phase-setup failure (cannot
//! list a category) propagates and aborts the run, leaving checkpoints in
//! place for resumption. Logging is the user-visible failure channel - every
//! failure gets a contextualized log line.

mod documents;
mod functions;
mod identity;
mod schema;
mod storage;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::models::{Bucket, Collection, Function, Team, User};
use crate::api::ProjectApi;
use crate::checkpoint::{pair_prefix, CheckpointStore};
use crate::error::{MigrateError, Result};
use crate::plan::{MigrationPlan, MigrationResource, ResourceDetail};
use crate::worker::WorkerCredentials;

/// Page size for document listing.
pub(crate) const DOCUMENT_PAGE_SIZE: u32 = 100;

/// Page size for file listing. Smaller than documents because each item
/// carries a binary transfer.
pub(crate) const FILE_PAGE_SIZE: u32 = 50;

/// Page size used when diffing destination schema objects.
pub(crate) const SCHEMA_PAGE_SIZE: u32 = 100;

/// Per-kind outcome counters.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct KindCounts {
    pub created: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Outcome counters for one `execute` run, keyed by item label
/// ("database", "document", "file", ...).
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExecutionSummary {
    pub kinds: BTreeMap<String, KindCounts>,
}

impl ExecutionSummary {
    pub fn totals(&self) -> KindCounts {
        let mut totals = KindCounts::default();
        for counts in self.kinds.values() {
            totals.created += counts.created;
            totals.skipped += counts.skipped;
            totals.failed += counts.failed;
        }
        totals
    }

    pub fn counts(&self, label: &str) -> KindCounts {
        self.kinds.get(label).copied().unwrap_or_default()
    }
}

/// The migration engine. One instance owns an entire run; no other writer
/// touches the same checkpoint namespace.
pub struct TransferExecutor {
    pub(crate) source: Arc<dyn ProjectApi>,
    pub(crate) dest: Arc<dyn ProjectApi>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) source_creds: WorkerCredentials,
    pub(crate) dest_creds: WorkerCredentials,
    /// Function ID of the deployed cloud worker, if any. Absent means every
    /// file goes through the local-buffer path.
    pub(crate) worker_id: Option<String>,
    cancel: CancellationToken,
    summary: Mutex<ExecutionSummary>,
}

impl TransferExecutor {
    pub fn new(
        source: Arc<dyn ProjectApi>,
        dest: Arc<dyn ProjectApi>,
        checkpoints: Arc<dyn CheckpointStore>,
        source_creds: WorkerCredentials,
        dest_creds: WorkerCredentials,
    ) -> Self {
        Self {
            source,
            dest,
            checkpoints,
            source_creds,
            dest_creds,
            worker_id: None,
            cancel: CancellationToken::new(),
            summary: Mutex::new(ExecutionSummary::default()),
        }
    }

    /// Route file binaries through an already-deployed cloud worker.
    pub fn with_worker(mut self, function_id: String) -> Self {
        self.worker_id = Some(function_id);
        self
    }

    /// Observe an externally owned cancellation token instead of the
    /// internally created one.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that callers use to request a cooperative stop. Observed before
    /// each phase and before each checkpointed unit of work; the in-flight
    /// operation completes, then [`MigrateError::Cancelled`] propagates.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full dependency-ordered walk over the plan.
    ///
    /// With `resume`, each document/file namespace fast-forwards from its
    /// stored cursor; without it, stale checkpoints for this migration pair
    /// are discarded first. On full success all checkpoints for the pair are
    /// cleared; on any error they stay for resumption.
    pub async fn execute(&self, plan: &MigrationPlan, resume: bool) -> Result<ExecutionSummary> {
        let prefix = self.pair_prefix();
        if !resume {
            if self.checkpoints.any_with_prefix(&prefix)? {
                warn!("Discarding checkpoints from a previous incomplete run");
            }
            self.checkpoints.clear_prefix(&prefix)?;
        }

        if plan.options.migrate_databases {
            self.check_cancelled()?;
            info!("Phase 1/11: databases");
            self.phase_databases(plan).await?;

            self.check_cancelled()?;
            info!("Phase 2/11: collections");
            self.phase_collections(plan).await?;

            self.check_cancelled()?;
            info!("Phase 3/11: scalar attributes");
            self.phase_scalar_attributes(plan).await?;

            self.check_cancelled()?;
            info!("Phase 4/11: relationship attributes");
            self.phase_relationship_attributes(plan).await?;

            self.check_cancelled()?;
            info!("Phase 5/11: indexes");
            self.phase_indexes(plan).await?;
        }

        if plan.options.migrate_documents {
            self.check_cancelled()?;
            info!("Phase 6/11: documents");
            self.phase_documents(plan, resume).await?;
        }

        if plan.options.migrate_storage {
            self.check_cancelled()?;
            info!("Phase 7/11: buckets");
            self.phase_buckets(plan).await?;

            if plan.options.migrate_files {
                self.check_cancelled()?;
                info!("Phase 8/11: files");
                self.phase_files(plan, resume).await?;
            }
        }

        if plan.options.migrate_functions {
            self.check_cancelled()?;
            info!("Phase 9/11: functions");
            self.phase_functions(plan).await?;
        }

        if plan.options.migrate_users {
            self.check_cancelled()?;
            info!("Phase 10/11: users");
            self.phase_users(plan).await?;
        }

        if plan.options.migrate_teams {
            self.check_cancelled()?;
            info!("Phase 11/11: teams");
            self.phase_teams(plan).await?;
        }

        // Only a fully successful run clears the resume state.
        self.checkpoints.clear_prefix(&prefix)?;

        let summary = self.summary.lock().unwrap().clone();
        let totals = summary.totals();
        info!(
            "Transfer complete: {} created, {} skipped, {} failed",
            totals.created, totals.skipped, totals.failed
        );
        Ok(summary)
    }

    // ===== Shared helpers =====

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(MigrateError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn pair_prefix(&self) -> String {
        pair_prefix(self.source.project_id(), self.dest.project_id())
    }

    pub(crate) fn note_created(&self, label: &str) {
        self.summary
            .lock()
            .unwrap()
            .kinds
            .entry(label.to_string())
            .or_default()
            .created += 1;
    }

    pub(crate) fn note_skipped(&self, label: &str) {
        self.summary
            .lock()
            .unwrap()
            .kinds
            .entry(label.to_string())
            .or_default()
            .skipped += 1;
    }

    pub(crate) fn note_failed(&self, label: &str) {
        self.summary
            .lock()
            .unwrap()
            .kinds
            .entry(label.to_string())
            .or_default()
            .failed += 1;
    }

    pub(crate) fn collection_detail<'a>(node: &'a MigrationResource) -> Option<&'a Collection> {
        match &node.detail {
            ResourceDetail::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub(crate) fn bucket_detail<'a>(node: &'a MigrationResource) -> Option<&'a Bucket> {
        match &node.detail {
            ResourceDetail::Bucket(bucket) => Some(bucket),
            _ => None,
        }
    }

    pub(crate) fn function_detail<'a>(node: &'a MigrationResource) -> Option<&'a Function> {
        match &node.detail {
            ResourceDetail::Function(function) => Some(function),
            _ => None,
        }
    }

    pub(crate) fn user_detail<'a>(node: &'a MigrationResource) -> Option<&'a User> {
        match &node.detail {
            ResourceDetail::User(user) => Some(user),
            _ => None,
        }
    }

    pub(crate) fn team_detail<'a>(node: &'a MigrationResource) -> Option<&'a Team> {
        match &node.detail {
            ResourceDetail::Team(team) => Some(team),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::models::*;
    use crate::api::MockProjectApi;
    use crate::checkpoint::{checkpoint_key, MemoryCheckpointStore};
    use crate::config::MigrationOptions;
    use crate::plan::MigrationPlan;
    use crate::scanner::Scanner;
    use serde_json::json;

    pub(crate) fn creds(project: &str) -> WorkerCredentials {
        WorkerCredentials {
            endpoint: format!("https://{}.example.com/v1", project),
            project_id: project.to_string(),
            api_key: format!("{}-key", project),
        }
    }

    pub(crate) fn executor(
        source: &Arc<MockProjectApi>,
        dest: &Arc<MockProjectApi>,
        store: &Arc<MemoryCheckpointStore>,
    ) -> TransferExecutor {
        TransferExecutor::new(
            source.clone(),
            dest.clone(),
            store.clone() as Arc<dyn CheckpointStore>,
            creds("src"),
            creds("dst"),
        )
    }

    pub(crate) fn seed_database(source: &MockProjectApi, db_id: &str) {
        source.add_database(Database {
            id: db_id.to_string(),
            name: db_id.to_string(),
            enabled: true,
        });
    }

    pub(crate) fn collection_fixture(id: &str, db: &str, attributes: serde_json::Value) -> Collection {
        serde_json::from_value(json!({
            "$id": id,
            "$databaseId": db,
            "$permissions": ["read(\"any\")"],
            "name": id,
            "enabled": true,
            "documentSecurity": false,
            "attributes": attributes,
            "indexes": []
        }))
        .unwrap()
    }

    pub(crate) fn document_fixture(id: &str, title: &str) -> Document {
        let mut map = serde_json::Map::new();
        map.insert("$id".to_string(), json!(id));
        map.insert("$permissions".to_string(), json!(["read(\"any\")"]));
        map.insert("$createdAt".to_string(), json!("2024-01-01T00:00:00.000+00:00"));
        map.insert("title".to_string(), json!(title));
        Document(map)
    }

    async fn scan_plan(source: &Arc<MockProjectApi>, options: MigrationOptions) -> MigrationPlan {
        Scanner::new(source.clone()).scan(&options).await.unwrap()
    }

    fn databases_only() -> MigrationOptions {
        MigrationOptions {
            migrate_storage: false,
            migrate_functions: false,
            migrate_users: false,
            migrate_teams: false,
            migrate_files: false,
            ..MigrationOptions::default()
        }
    }

    #[tokio::test]
    async fn test_execute_twice_is_idempotent() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        seed_database(&source, "db1");
        source.add_collection(
            "db1",
            collection_fixture(
                "posts",
                "db1",
                json!([
                    {"key": "title", "type": "string", "status": "available", "required": true, "array": false, "size": 255}
                ]),
            ),
        );
        source.add_document("db1", "posts", document_fixture("d1", "one"));
        source.add_document("db1", "posts", document_fixture("d2", "two"));

        let plan = scan_plan(&source, databases_only()).await;

        let first = executor(&source, &dest, &store);
        first.execute(&plan, false).await.unwrap();
        let creates_after_first = dest.ops_with_prefix("create_");
        assert!(creates_after_first >= 4, "db + collection + attribute + 2 docs");

        let second = executor(&source, &dest, &store);
        let summary = second.execute(&plan, false).await.unwrap();

        // Second run observes "already exists" everywhere: zero new creates.
        assert_eq!(dest.ops_with_prefix("create_"), creates_after_first);
        assert_eq!(summary.totals().created, 0);
        assert!(summary.totals().skipped > 0);
    }

    #[tokio::test]
    async fn test_disabled_database_causes_zero_api_calls_for_subtree() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        seed_database(&source, "db1");
        seed_database(&source, "db2");
        source.add_collection("db1", collection_fixture("posts", "db1", json!([])));
        source.add_collection("db2", collection_fixture("notes", "db2", json!([])));
        source.add_document("db1", "posts", document_fixture("d1", "one"));

        let mut plan = scan_plan(&source, databases_only()).await;
        // Disable db1; its collection stays individually enabled.
        plan.databases[0].enabled = false;
        assert!(plan.databases[0].children[0].enabled);

        executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        let db1_ops: Vec<_> = dest
            .ops()
            .into_iter()
            .filter(|op| op.contains("db1") || op.contains("posts"))
            .collect();
        assert!(db1_ops.is_empty(), "no destination calls for db1: {:?}", db1_ops);
        assert_eq!(dest.ops_with_prefix("create_database db2"), 1);
    }

    #[tokio::test]
    async fn test_document_scenario_150_docs_two_pages_checkpoint_per_item() {
        // Counting wrapper around the memory store.
        struct CountingStore {
            inner: MemoryCheckpointStore,
            saves: Mutex<u64>,
        }
        impl CheckpointStore for CountingStore {
            fn save(&self, key: &str, cursor: &str) -> crate::error::Result<()> {
                *self.saves.lock().unwrap() += 1;
                self.inner.save(key, cursor)
            }
            fn get(&self, key: &str) -> crate::error::Result<Option<String>> {
                self.inner.get(key)
            }
            fn clear_prefix(&self, prefix: &str) -> crate::error::Result<()> {
                self.inner.clear_prefix(prefix)
            }
            fn any_with_prefix(&self, prefix: &str) -> crate::error::Result<bool> {
                self.inner.any_with_prefix(prefix)
            }
        }

        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(CountingStore {
            inner: MemoryCheckpointStore::new(),
            saves: Mutex::new(0),
        });

        seed_database(&source, "db1");
        source.add_collection(
            "db1",
            collection_fixture(
                "posts",
                "db1",
                json!([
                    {"key": "title", "type": "string", "status": "available", "required": true, "array": false, "size": 255},
                    {"key": "authorId", "type": "string", "status": "available", "required": true, "array": false, "size": 64}
                ]),
            ),
        );
        for i in 0..150 {
            source.add_document("db1", "posts", document_fixture(&format!("doc{:03}", i), "x"));
        }

        let plan = scan_plan(&source, databases_only()).await;
        let exec = TransferExecutor::new(
            source.clone(),
            dest.clone(),
            store.clone() as Arc<dyn CheckpointStore>,
            creds("src"),
            creds("dst"),
        );
        let summary = exec.execute(&plan, false).await.unwrap();

        // Exactly 2 list pages (100 + 50).
        assert_eq!(source.ops_with_prefix("list_documents"), 2);
        // A checkpoint write after every one of the 150 creates.
        assert_eq!(*store.saves.lock().unwrap(), 150);
        assert_eq!(summary.counts("document").created, 150);
        assert_eq!(dest.ops_with_prefix("create_document"), 150);
        // No relationship attributes anywhere in this plan.
        assert_eq!(
            dest.ops()
                .iter()
                .filter(|op| op.contains("relationship"))
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn test_resume_migrates_only_remaining_documents() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        seed_database(&source, "db1");
        source.add_collection("db1", collection_fixture("posts", "db1", json!([])));
        for i in 0..10 {
            source.add_document("db1", "posts", document_fixture(&format!("doc{:02}", i), "x"));
        }

        let plan = scan_plan(&source, databases_only()).await;

        // Simulate an interrupted run: first 4 documents migrated, cursor at doc03.
        let dest_exec = executor(&source, &dest, &store);
        dest_exec.phase_databases(&plan).await.unwrap();
        dest_exec.phase_collections(&plan).await.unwrap();
        for i in 0..4 {
            let id = format!("doc{:02}", i);
            dest.create_document("db1", "posts", &id, serde_json::Map::new(), &[])
                .await
                .unwrap();
        }
        store
            .save(
                &checkpoint_key("src", "dst", "document", "db1/posts"),
                "doc03",
            )
            .unwrap();

        let before = dest.ops_with_prefix("create_document");
        let exec = executor(&source, &dest, &store);
        let summary = exec.execute(&plan, true).await.unwrap();

        // Exactly the remaining 6 documents, no duplicates among the first 4.
        assert_eq!(dest.ops_with_prefix("create_document") - before, 6);
        assert_eq!(summary.counts("document").created, 6);
        assert_eq!(dest.document_ids("db1", "posts").len(), 10);
        // Full success cleared the pair's checkpoints.
        assert!(!store.any_with_prefix(&pair_prefix("src", "dst")).unwrap());
    }

    #[tokio::test]
    async fn test_relationship_created_after_both_collections() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        seed_database(&source, "db1");
        source.add_collection(
            "db1",
            collection_fixture(
                "posts",
                "db1",
                json!([
                    {"key": "title", "type": "string", "status": "available", "required": true, "array": false, "size": 255},
                    {"key": "author", "type": "relationship", "status": "available", "required": false, "array": false,
                     "relatedCollection": "authors", "relationType": "manyToOne", "twoWay": false,
                     "onDelete": "restrict", "side": "parent"}
                ]),
            ),
        );
        source.add_collection("db1", collection_fixture("authors", "db1", json!([])));

        let plan = scan_plan(&source, databases_only()).await;
        executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        let ops = dest.ops();
        let created_posts = ops
            .iter()
            .position(|op| op.starts_with("create_collection db1/posts"))
            .unwrap();
        let created_authors = ops
            .iter()
            .position(|op| op.starts_with("create_collection db1/authors"))
            .unwrap();
        let created_relationship = ops
            .iter()
            .position(|op| op.starts_with("create_attribute db1/posts/author"))
            .unwrap();

        assert!(created_relationship > created_posts);
        assert!(created_relationship > created_authors);
    }

    #[tokio::test]
    async fn test_cancellation_propagates_and_leaves_checkpoints() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        seed_database(&source, "db1");
        let plan = scan_plan(&source, databases_only()).await;

        let exec = executor(&source, &dest, &store);
        exec.cancel_token().cancel();

        match exec.execute(&plan, false).await {
            Err(MigrateError::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|_| ())),
        }
        assert_eq!(dest.ops_with_prefix("create_"), 0);
    }
}
