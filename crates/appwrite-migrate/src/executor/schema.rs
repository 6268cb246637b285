//! Schema phases: databases, collections, attributes, indexes.
//!
//! Attribute creation is ordered: every scalar attribute across every
//! collection first, relationship attributes second. A relationship is only
//! valid once both endpoint collections exist, and interleaving would let a
//! relationship race its target collection's creation.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, error, warn};

use super::{TransferExecutor, SCHEMA_PAGE_SIZE};
use crate::api::models::Attribute;
use crate::error::Result;
use crate::plan::{MigrationPlan, ResourceDetail, ResourceKind};

impl TransferExecutor {
    pub(crate) async fn phase_databases(&self, plan: &MigrationPlan) -> Result<()> {
        for db in plan.enabled_databases() {
            self.check_cancelled()?;
            let enabled = match &db.detail {
                ResourceDetail::Database(detail) => detail.enabled,
                _ => true,
            };
            match self.dest.get_database(&db.target_id).await {
                Ok(Some(_)) => {
                    debug!("Database {} already exists, skipping", db.target_id);
                    self.note_skipped("database");
                }
                Ok(None) => {
                    match self
                        .dest
                        .create_database(&db.target_id, &db.target_name, enabled)
                        .await
                    {
                        Ok(()) => self.note_created("database"),
                        Err(e) => {
                            error!("Failed to create database {}: {}", db.target_id, e);
                            self.note_failed("database");
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to look up database {}: {}", db.target_id, e);
                    self.note_failed("database");
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn phase_collections(&self, plan: &MigrationPlan) -> Result<()> {
        for db in plan.enabled_databases() {
            for coll in db.enabled_children() {
                self.check_cancelled()?;
                let Some(detail) = Self::collection_detail(coll) else {
                    continue;
                };
                match self.dest.get_collection(&db.target_id, &coll.target_id).await {
                    Ok(Some(_)) => {
                        debug!(
                            "Collection {}/{} already exists, skipping",
                            db.target_id, coll.target_id
                        );
                        self.note_skipped("collection");
                    }
                    Ok(None) => {
                        let mut created = detail.clone();
                        created.id = coll.target_id.clone();
                        created.name = coll.target_name.clone();
                        created.database_id = db.target_id.clone();
                        // Attributes and indexes go through their own phases.
                        created.attributes = Vec::new();
                        created.indexes = Vec::new();
                        match self.dest.create_collection(&db.target_id, &created).await {
                            Ok(()) => self.note_created("collection"),
                            Err(e) => {
                                error!(
                                    "Failed to create collection {}/{}: {}",
                                    db.target_id, coll.target_id, e
                                );
                                self.note_failed("collection");
                            }
                        }
                    }
                    Err(e) => {
                        error!(
                            "Failed to look up collection {}/{}: {}",
                            db.target_id, coll.target_id, e
                        );
                        self.note_failed("collection");
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn phase_scalar_attributes(&self, plan: &MigrationPlan) -> Result<()> {
        for db in plan.enabled_databases() {
            for coll in db.enabled_children() {
                self.check_cancelled()?;
                let Some(detail) = Self::collection_detail(coll) else {
                    continue;
                };
                if detail.attributes.iter().all(|a| a.is_relationship()) {
                    continue;
                }

                let existing = self.existing_attribute_keys(&db.target_id, &coll.target_id).await?;
                for attribute in detail.attributes.iter().filter(|a| !a.is_relationship()) {
                    if existing.contains(&attribute.key) {
                        self.note_skipped("attribute");
                        continue;
                    }
                    self.create_attribute_degrading(&db.target_id, &coll.target_id, attribute)
                        .await;
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn phase_relationship_attributes(&self, plan: &MigrationPlan) -> Result<()> {
        for db in plan.enabled_databases() {
            // Sibling collection renames have to carry into relationship targets.
            let renames: HashMap<&str, &str> = db
                .children
                .iter()
                .filter(|c| c.kind == ResourceKind::Collection)
                .map(|c| (c.source_id.as_str(), c.target_id.as_str()))
                .collect();

            for coll in db.enabled_children() {
                self.check_cancelled()?;
                let Some(detail) = Self::collection_detail(coll) else {
                    continue;
                };
                if !detail.attributes.iter().any(|a| a.is_relationship()) {
                    continue;
                }

                let existing = self.existing_attribute_keys(&db.target_id, &coll.target_id).await?;
                for attribute in detail.attributes.iter().filter(|a| a.is_relationship()) {
                    if existing.contains(&attribute.key) {
                        self.note_skipped("attribute");
                        continue;
                    }

                    let mut remapped = attribute.clone();
                    if let Some(related) = &remapped.related_collection {
                        if let Some(target) = renames.get(related.as_str()) {
                            remapped.related_collection = Some((*target).to_string());
                        }
                    }

                    match self
                        .dest
                        .create_attribute(&db.target_id, &coll.target_id, &remapped)
                        .await
                    {
                        Ok(()) => self.note_created("attribute"),
                        Err(e) => {
                            error!(
                                "Failed to create relationship attribute {}/{}/{}: {}",
                                db.target_id, coll.target_id, attribute.key, e
                            );
                            self.note_failed("attribute");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn phase_indexes(&self, plan: &MigrationPlan) -> Result<()> {
        for db in plan.enabled_databases() {
            for coll in db.enabled_children() {
                self.check_cancelled()?;
                let Some(detail) = Self::collection_detail(coll) else {
                    continue;
                };
                if detail.indexes.is_empty() {
                    continue;
                }

                let existing = self
                    .dest
                    .list_indexes(&db.target_id, &coll.target_id, SCHEMA_PAGE_SIZE)
                    .await?;
                let existing: HashSet<&str> =
                    existing.indexes.iter().map(|i| i.key.as_str()).collect();

                for index in &detail.indexes {
                    if existing.contains(index.key.as_str()) {
                        self.note_skipped("index");
                        continue;
                    }
                    match self
                        .dest
                        .create_index(&db.target_id, &coll.target_id, index)
                        .await
                    {
                        Ok(()) => self.note_created("index"),
                        Err(e) => {
                            error!(
                                "Failed to create index {}/{}/{}: {}",
                                db.target_id, coll.target_id, index.key, e
                            );
                            self.note_failed("index");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn existing_attribute_keys(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> Result<HashSet<String>> {
        let list = self
            .dest
            .list_attributes(database_id, collection_id, SCHEMA_PAGE_SIZE)
            .await?;
        Ok(list.attributes.into_iter().map(|a| a.key).collect())
    }

    /// Create a scalar attribute, degrading on rejection.
    ///
    /// Numeric constraints from the source are sanitized first; if the
    /// destination still rejects the attribute, it is retried once with
    /// min/max/default stripped entirely. Structure wins over constraint
    /// fidelity.
    async fn create_attribute_degrading(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: &Attribute,
    ) {
        let mut candidate = attribute.clone();
        if matches!(candidate.attr_type.as_str(), "integer" | "float") {
            let integer = candidate.attr_type == "integer";
            candidate.min = sanitize_numeric(&attribute.min, integer);
            candidate.max = sanitize_numeric(&attribute.max, integer);
            candidate.default = sanitize_numeric(&attribute.default, integer);
        }
        let had_constraints =
            candidate.min.is_some() || candidate.max.is_some() || candidate.default.is_some();

        match self
            .dest
            .create_attribute(database_id, collection_id, &candidate)
            .await
        {
            Ok(()) => {
                self.note_created("attribute");
                return;
            }
            Err(e) if had_constraints => {
                warn!(
                    "Attribute {}/{}/{} rejected with constraints ({}), retrying without min/max/default",
                    database_id, collection_id, attribute.key, e
                );
            }
            Err(e) => {
                error!(
                    "Failed to create attribute {}/{}/{}: {}",
                    database_id, collection_id, attribute.key, e
                );
                self.note_failed("attribute");
                return;
            }
        }

        candidate.min = None;
        candidate.max = None;
        candidate.default = None;
        match self
            .dest
            .create_attribute(database_id, collection_id, &candidate)
            .await
        {
            Ok(()) => self.note_created("attribute"),
            Err(e) => {
                error!(
                    "Failed to create attribute {}/{}/{} even without constraints: {}",
                    database_id, collection_id, attribute.key, e
                );
                self.note_failed("attribute");
            }
        }
    }
}

/// Normalize a numeric constraint from the source schema.
///
/// Sources can carry garbage here (booleans, blank strings, non-finite
/// floats); anything that does not cleanly resolve to a finite number of the
/// attribute's type becomes absent.
pub(crate) fn sanitize_numeric(value: &Option<Value>, integer: bool) -> Option<Value> {
    let value = value.as_ref()?;
    match value {
        Value::Number(n) => {
            if integer {
                if let Some(i) = n.as_i64() {
                    Some(Value::from(i))
                } else if let Some(u) = n.as_u64() {
                    Some(Value::from(u))
                } else {
                    n.as_f64()
                        .filter(|f| f.is_finite())
                        .map(|f| Value::from(f as i64))
                }
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(Value::from)
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if integer {
                trimmed.parse::<i64>().ok().map(Value::from)
            } else {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Value::from)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{collection_fixture, executor, seed_database};
    use super::*;
    use crate::api::{MockProjectApi, ProjectApi};
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::MigrationOptions;
    use crate::scanner::Scanner;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_sanitize_numeric_integer() {
        assert_eq!(sanitize_numeric(&Some(json!(5)), true), Some(json!(5)));
        assert_eq!(sanitize_numeric(&Some(json!(-3)), true), Some(json!(-3)));
        assert_eq!(sanitize_numeric(&Some(json!("42")), true), Some(json!(42)));
        assert_eq!(sanitize_numeric(&Some(json!(" 7 ")), true), Some(json!(7)));

        assert_eq!(sanitize_numeric(&None, true), None);
        assert_eq!(sanitize_numeric(&Some(json!(null)), true), None);
        assert_eq!(sanitize_numeric(&Some(json!(true)), true), None);
        assert_eq!(sanitize_numeric(&Some(json!("")), true), None);
        assert_eq!(sanitize_numeric(&Some(json!("   ")), true), None);
        assert_eq!(sanitize_numeric(&Some(json!("abc")), true), None);
        assert_eq!(sanitize_numeric(&Some(json!([1])), true), None);
    }

    #[test]
    fn test_sanitize_numeric_float() {
        assert_eq!(sanitize_numeric(&Some(json!(1.5)), false), Some(json!(1.5)));
        assert_eq!(
            sanitize_numeric(&Some(json!("2.25")), false),
            Some(json!(2.25))
        );
        // "Infinity" parses to a non-finite float and must be dropped.
        assert_eq!(sanitize_numeric(&Some(json!("Infinity")), false), None);
        assert_eq!(sanitize_numeric(&Some(json!(false)), false), None);
    }

    async fn plan_for(source: &Arc<MockProjectApi>) -> crate::plan::MigrationPlan {
        let options = MigrationOptions {
            migrate_storage: false,
            migrate_functions: false,
            migrate_users: false,
            migrate_teams: false,
            migrate_documents: false,
            migrate_files: false,
            ..MigrationOptions::default()
        };
        Scanner::new(source.clone()).scan(&options).await.unwrap()
    }

    #[tokio::test]
    async fn test_integer_attribute_degrades_to_unconstrained() {
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
                    {"key": "views", "type": "integer", "status": "available", "required": false,
                     "array": false, "min": 0, "max": 1000000, "default": 0}
                ]),
            ),
        );
        // Destination rejects the constrained form once.
        dest.fail_times("create_attribute db1/posts/views with-bounds", 1);

        let plan = plan_for(&source).await;
        let exec = executor(&source, &dest, &store);
        let summary = exec.execute(&plan, false).await.unwrap();

        let attribute_ops: Vec<_> = dest
            .ops()
            .into_iter()
            .filter(|op| op.starts_with("create_attribute db1/posts/views"))
            .collect();
        assert_eq!(attribute_ops.len(), 2);
        assert!(attribute_ops[0].ends_with("with-bounds"));
        assert!(!attribute_ops[1].ends_with("with-bounds"));
        assert_eq!(summary.counts("attribute").created, 1);
        assert_eq!(summary.counts("attribute").failed, 0);
    }

    #[tokio::test]
    async fn test_malformed_constraints_sanitized_before_first_attempt() {
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
                    {"key": "score", "type": "integer", "status": "available", "required": false,
                     "array": false, "min": "", "max": true, "default": "  "}
                ]),
            ),
        );

        let plan = plan_for(&source).await;
        executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        // All three constraints were garbage, so the single attempt carries none.
        assert_eq!(dest.ops_with_prefix("create_attribute db1/posts/score"), 1);
        assert_eq!(
            dest.ops_with_prefix("create_attribute db1/posts/score with-bounds"),
            0
        );
    }

    #[tokio::test]
    async fn test_renamed_targets_carry_into_relationships() {
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
                    {"key": "author", "type": "relationship", "status": "available", "required": false,
                     "array": false, "relatedCollection": "authors", "relationType": "manyToOne",
                     "twoWay": false, "onDelete": "restrict", "side": "parent"}
                ]),
            ),
        );
        source.add_collection("db1", collection_fixture("authors", "db1", json!([])));

        let mut plan = plan_for(&source).await;
        plan.databases[0].target_id = "db1-copy".to_string();
        for child in &mut plan.databases[0].children {
            if child.source_id == "authors" {
                child.target_id = "writers".to_string();
            }
        }

        executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        assert_eq!(dest.ops_with_prefix("create_database db1-copy"), 1);
        assert_eq!(dest.ops_with_prefix("create_collection db1-copy/writers"), 1);
        // The relationship now points at the renamed sibling.
        let created = dest
            .get_collection("db1-copy", "posts")
            .await
            .unwrap()
            .is_some();
        assert!(created);
        let attributes = dest
            .list_attributes("db1-copy", "posts", 100)
            .await
            .unwrap();
        let relationship = attributes
            .attributes
            .iter()
            .find(|a| a.key == "author")
            .unwrap();
        assert_eq!(relationship.related_collection.as_deref(), Some("writers"));
    }

    #[tokio::test]
    async fn test_existing_indexes_are_skipped() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        seed_database(&source, "db1");
        let mut coll = collection_fixture("posts", "db1", json!([]));
        coll.indexes = vec![
            serde_json::from_value(json!({"key": "a_idx", "type": "key", "attributes": ["a"], "orders": []})).unwrap(),
            serde_json::from_value(json!({"key": "b_idx", "type": "key", "attributes": ["b"], "orders": []})).unwrap(),
        ];
        source.add_collection("db1", coll.clone());

        // Destination already has the collection with one of the two indexes.
        seed_database(&dest, "db1");
        let mut existing = coll;
        existing.indexes.truncate(1);
        dest.add_collection("db1", existing);

        let plan = plan_for(&source).await;
        let summary = executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        assert_eq!(dest.ops_with_prefix("create_index db1/posts/a_idx"), 0);
        assert_eq!(dest.ops_with_prefix("create_index db1/posts/b_idx"), 1);
        assert_eq!(summary.counts("index").created, 1);
        assert_eq!(summary.counts("index").skipped, 1);
    }
}
