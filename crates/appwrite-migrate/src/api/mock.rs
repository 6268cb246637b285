//! In-memory [`ProjectApi`] implementation for tests.
//!
//! Backed by plain maps with an operation log, so tests can seed a source
//! project with fixtures, run the engine against an empty destination, and
//! assert on exactly which API calls were issued. Failure injection is
//! per-operation-prefix with an optional countdown, which covers both
//! "fails once then succeeds" (attribute degradation) and "always fails"
//! (worker deployment fallback) scenarios.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{MigrateError, Result};

use super::models::*;
use super::ProjectApi;

type ExecHandler = Box<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Default)]
struct MockState {
    databases: Vec<Database>,
    collections: HashMap<String, Vec<Collection>>,
    attributes: HashMap<(String, String), Vec<Attribute>>,
    indexes: HashMap<(String, String), Vec<CollectionIndex>>,
    documents: HashMap<(String, String), Vec<Document>>,
    buckets: Vec<Bucket>,
    files: HashMap<String, Vec<StorageFile>>,
    file_data: HashMap<(String, String), Bytes>,
    functions: Vec<Function>,
    variables: HashMap<String, Vec<Variable>>,
    deployments: HashMap<String, Vec<Deployment>>,
    deployment_data: HashMap<(String, String), Bytes>,
    users: Vec<User>,
    teams: Vec<Team>,
    memberships: HashMap<String, Vec<Membership>>,
    ops: Vec<String>,
    /// Operation prefix -> remaining failure count (usize::MAX = always fail).
    fail_ops: HashMap<String, usize>,
    /// Status assigned to deployments created through the API.
    deployment_status: String,
    next_id: u64,
}

/// In-memory Appwrite project for tests.
pub struct MockProjectApi {
    project_id: String,
    state: Mutex<MockState>,
    exec_handler: Mutex<Option<ExecHandler>>,
}

impl MockProjectApi {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            state: Mutex::new(MockState {
                deployment_status: "ready".to_string(),
                ..MockState::default()
            }),
            exec_handler: Mutex::new(None),
        }
    }

    // ===== Seeding =====

    pub fn add_database(&self, database: Database) {
        self.state.lock().unwrap().databases.push(database);
    }

    pub fn add_collection(&self, database_id: &str, collection: Collection) {
        let mut state = self.state.lock().unwrap();
        let key = (database_id.to_string(), collection.id.clone());
        state
            .attributes
            .entry(key.clone())
            .or_default()
            .extend(collection.attributes.iter().cloned());
        state
            .indexes
            .entry(key)
            .or_default()
            .extend(collection.indexes.iter().cloned());
        state
            .collections
            .entry(database_id.to_string())
            .or_default()
            .push(collection);
    }

    pub fn add_document(&self, database_id: &str, collection_id: &str, document: Document) {
        self.state
            .lock()
            .unwrap()
            .documents
            .entry((database_id.to_string(), collection_id.to_string()))
            .or_default()
            .push(document);
    }

    pub fn add_bucket(&self, bucket: Bucket) {
        self.state.lock().unwrap().buckets.push(bucket);
    }

    pub fn add_file(&self, bucket_id: &str, file: StorageFile, data: Bytes) {
        let mut state = self.state.lock().unwrap();
        state
            .file_data
            .insert((bucket_id.to_string(), file.id.clone()), data);
        state.files.entry(bucket_id.to_string()).or_default().push(file);
    }

    pub fn add_function(&self, function: Function) {
        self.state.lock().unwrap().functions.push(function);
    }

    pub fn add_variable(&self, function_id: &str, variable: Variable) {
        self.state
            .lock()
            .unwrap()
            .variables
            .entry(function_id.to_string())
            .or_default()
            .push(variable);
    }

    pub fn add_deployment(&self, function_id: &str, deployment: Deployment, data: Bytes) {
        let mut state = self.state.lock().unwrap();
        state
            .deployment_data
            .insert((function_id.to_string(), deployment.id.clone()), data);
        state
            .deployments
            .entry(function_id.to_string())
            .or_default()
            .push(deployment);
    }

    pub fn add_user(&self, user: User) {
        self.state.lock().unwrap().users.push(user);
    }

    pub fn add_team(&self, team: Team) {
        self.state.lock().unwrap().teams.push(team);
    }

    pub fn add_membership(&self, team_id: &str, membership: Membership) {
        self.state
            .lock()
            .unwrap()
            .memberships
            .entry(team_id.to_string())
            .or_default()
            .push(membership);
    }

    // ===== Test controls =====

    /// Fail the next `count` operations whose log line starts with `prefix`.
    pub fn fail_times(&self, prefix: &str, count: usize) {
        self.state
            .lock()
            .unwrap()
            .fail_ops
            .insert(prefix.to_string(), count);
    }

    /// Fail every operation whose log line starts with `prefix`.
    pub fn fail_always(&self, prefix: &str) {
        self.fail_times(prefix, usize::MAX);
    }

    /// Status assigned to deployments created through `create_deployment`.
    pub fn set_deployment_status(&self, status: &str) {
        self.state.lock().unwrap().deployment_status = status.to_string();
    }

    /// Handler invoked by `execute_function`; receives the request body and
    /// returns the response body.
    pub fn set_exec_handler(&self, handler: impl Fn(&str) -> String + Send + Sync + 'static) {
        *self.exec_handler.lock().unwrap() = Some(Box::new(handler));
    }

    // ===== Assertions =====

    /// All logged operations, in call order.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    /// Number of logged operations starting with `prefix`.
    pub fn ops_with_prefix(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    pub fn file_content(&self, bucket_id: &str, file_id: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .file_data
            .get(&(bucket_id.to_string(), file_id.to_string()))
            .cloned()
    }

    pub fn document_ids(&self, database_id: &str, collection_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .documents
            .get(&(database_id.to_string(), collection_id.to_string()))
            .map(|docs| docs.iter().map(|d| d.id().to_string()).collect())
            .unwrap_or_default()
    }

    fn record(&self, op: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(op.clone());

        let matched = state
            .fail_ops
            .iter()
            .find(|(prefix, count)| op.starts_with(prefix.as_str()) && **count > 0)
            .map(|(prefix, _)| prefix.clone());
        if let Some(prefix) = matched {
            let count = state.fail_ops.get_mut(&prefix).unwrap();
            if *count != usize::MAX {
                *count -= 1;
            }
            return Err(MigrateError::api(500, op, "injected failure"));
        }
        Ok(())
    }

    fn generate_id(&self) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        format!("mock-{}", state.next_id)
    }
}

/// Cursor-after pagination over an ordered slice.
fn page<T: Clone>(items: &[T], limit: u32, cursor_after: Option<&str>, id_of: impl Fn(&T) -> &str) -> Vec<T> {
    let start = match cursor_after {
        Some(cursor) => match items.iter().position(|item| id_of(item) == cursor) {
            Some(pos) => pos + 1,
            None => return Vec::new(),
        },
        None => 0,
    };
    items.iter().skip(start).take(limit as usize).cloned().collect()
}

#[async_trait]
impl ProjectApi for MockProjectApi {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_databases(&self, limit: u32) -> Result<DatabaseList> {
        self.record("list_databases".to_string())?;
        let state = self.state.lock().unwrap();
        Ok(DatabaseList {
            total: state.databases.len() as u64,
            databases: page(&state.databases, limit, None, |d| &d.id),
        })
    }

    async fn get_database(&self, database_id: &str) -> Result<Option<Database>> {
        self.record(format!("get_database {}", database_id))?;
        let state = self.state.lock().unwrap();
        Ok(state.databases.iter().find(|d| d.id == database_id).cloned())
    }

    async fn create_database(&self, database_id: &str, name: &str, enabled: bool) -> Result<()> {
        self.record(format!("create_database {}", database_id))?;
        self.state.lock().unwrap().databases.push(Database {
            id: database_id.to_string(),
            name: name.to_string(),
            enabled,
        });
        Ok(())
    }

    async fn list_collections(&self, database_id: &str, limit: u32) -> Result<CollectionList> {
        self.record(format!("list_collections {}", database_id))?;
        let state = self.state.lock().unwrap();
        let collections = state
            .collections
            .get(database_id)
            .map(|c| page(c, limit, None, |x| &x.id))
            .unwrap_or_default();
        Ok(CollectionList {
            total: collections.len() as u64,
            collections,
        })
    }

    async fn get_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Option<Collection>> {
        self.record(format!("get_collection {}/{}", database_id, collection_id))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .collections
            .get(database_id)
            .and_then(|c| c.iter().find(|x| x.id == collection_id))
            .cloned())
    }

    async fn create_collection(&self, database_id: &str, collection: &Collection) -> Result<()> {
        self.record(format!("create_collection {}/{}", database_id, collection.id))?;
        let mut created = collection.clone();
        created.attributes = Vec::new();
        created.indexes = Vec::new();
        self.state
            .lock()
            .unwrap()
            .collections
            .entry(database_id.to_string())
            .or_default()
            .push(created);
        Ok(())
    }

    async fn list_attributes(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
    ) -> Result<AttributeList> {
        self.record(format!("list_attributes {}/{}", database_id, collection_id))?;
        let state = self.state.lock().unwrap();
        let attributes = state
            .attributes
            .get(&(database_id.to_string(), collection_id.to_string()))
            .map(|a| page(a, limit, None, |x| &x.key))
            .unwrap_or_default();
        Ok(AttributeList {
            total: attributes.len() as u64,
            attributes,
        })
    }

    async fn create_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: &Attribute,
    ) -> Result<()> {
        let constraints = if attribute.min.is_some() || attribute.max.is_some() {
            " with-bounds"
        } else {
            ""
        };
        self.record(format!(
            "create_attribute {}/{}/{}{}",
            database_id, collection_id, attribute.key, constraints
        ))?;
        self.state
            .lock()
            .unwrap()
            .attributes
            .entry((database_id.to_string(), collection_id.to_string()))
            .or_default()
            .push(attribute.clone());
        Ok(())
    }

    async fn list_indexes(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
    ) -> Result<IndexList> {
        self.record(format!("list_indexes {}/{}", database_id, collection_id))?;
        let state = self.state.lock().unwrap();
        let indexes = state
            .indexes
            .get(&(database_id.to_string(), collection_id.to_string()))
            .map(|i| page(i, limit, None, |x| &x.key))
            .unwrap_or_default();
        Ok(IndexList {
            total: indexes.len() as u64,
            indexes,
        })
    }

    async fn create_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index: &CollectionIndex,
    ) -> Result<()> {
        self.record(format!(
            "create_index {}/{}/{}",
            database_id, collection_id, index.key
        ))?;
        self.state
            .lock()
            .unwrap()
            .indexes
            .entry((database_id.to_string(), collection_id.to_string()))
            .or_default()
            .push(index.clone());
        Ok(())
    }

    async fn list_documents(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
        cursor_after: Option<&str>,
    ) -> Result<DocumentList> {
        self.record(format!("list_documents {}/{}", database_id, collection_id))?;
        let state = self.state.lock().unwrap();
        let all = state
            .documents
            .get(&(database_id.to_string(), collection_id.to_string()));
        let documents = all
            .map(|d| page(d, limit, cursor_after, |x| x.id()))
            .unwrap_or_default();
        Ok(DocumentList {
            total: all.map(|d| d.len() as u64).unwrap_or(0),
            documents,
        })
    }

    async fn get_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>> {
        self.record(format!(
            "get_document {}/{}/{}",
            database_id, collection_id, document_id
        ))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .documents
            .get(&(database_id.to_string(), collection_id.to_string()))
            .and_then(|d| d.iter().find(|x| x.id() == document_id))
            .cloned())
    }

    async fn create_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
        data: serde_json::Map<String, Value>,
        permissions: &[String],
    ) -> Result<()> {
        self.record(format!(
            "create_document {}/{}/{}",
            database_id, collection_id, document_id
        ))?;
        let mut map = data;
        map.insert("$id".to_string(), json!(document_id));
        map.insert("$permissions".to_string(), json!(permissions));
        self.state
            .lock()
            .unwrap()
            .documents
            .entry((database_id.to_string(), collection_id.to_string()))
            .or_default()
            .push(Document(map));
        Ok(())
    }

    async fn list_buckets(&self, limit: u32) -> Result<BucketList> {
        self.record("list_buckets".to_string())?;
        let state = self.state.lock().unwrap();
        Ok(BucketList {
            total: state.buckets.len() as u64,
            buckets: page(&state.buckets, limit, None, |b| &b.id),
        })
    }

    async fn get_bucket(&self, bucket_id: &str) -> Result<Option<Bucket>> {
        self.record(format!("get_bucket {}", bucket_id))?;
        let state = self.state.lock().unwrap();
        Ok(state.buckets.iter().find(|b| b.id == bucket_id).cloned())
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<()> {
        self.record(format!("create_bucket {}", bucket.id))?;
        self.state.lock().unwrap().buckets.push(bucket.clone());
        Ok(())
    }

    async fn list_files(
        &self,
        bucket_id: &str,
        limit: u32,
        cursor_after: Option<&str>,
    ) -> Result<FileList> {
        self.record(format!("list_files {}", bucket_id))?;
        let state = self.state.lock().unwrap();
        let all = state.files.get(bucket_id);
        let files = all
            .map(|f| page(f, limit, cursor_after, |x| x.id.as_str()))
            .unwrap_or_default();
        Ok(FileList {
            total: all.map(|f| f.len() as u64).unwrap_or(0),
            files,
        })
    }

    async fn get_file(&self, bucket_id: &str, file_id: &str) -> Result<Option<StorageFile>> {
        self.record(format!("get_file {}/{}", bucket_id, file_id))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .get(bucket_id)
            .and_then(|f| f.iter().find(|x| x.id == file_id))
            .cloned())
    }

    async fn download_file(&self, bucket_id: &str, file_id: &str) -> Result<Bytes> {
        self.record(format!("download_file {}/{}", bucket_id, file_id))?;
        let state = self.state.lock().unwrap();
        state
            .file_data
            .get(&(bucket_id.to_string(), file_id.to_string()))
            .cloned()
            .ok_or_else(|| MigrateError::api(404, format!("download file {}", file_id), "not found"))
    }

    async fn upload_file(
        &self,
        bucket_id: &str,
        file_id: &str,
        file_name: &str,
        data: Bytes,
        permissions: &[String],
    ) -> Result<()> {
        self.record(format!("upload_file {}/{}", bucket_id, file_id))?;
        let mut state = self.state.lock().unwrap();
        state
            .file_data
            .insert((bucket_id.to_string(), file_id.to_string()), data.clone());
        state.files.entry(bucket_id.to_string()).or_default().push(StorageFile {
            id: file_id.to_string(),
            bucket_id: bucket_id.to_string(),
            permissions: permissions.to_vec(),
            name: file_name.to_string(),
            mime_type: String::new(),
            size_original: data.len() as u64,
        });
        Ok(())
    }

    async fn list_functions(&self, limit: u32) -> Result<FunctionList> {
        self.record("list_functions".to_string())?;
        let state = self.state.lock().unwrap();
        Ok(FunctionList {
            total: state.functions.len() as u64,
            functions: page(&state.functions, limit, None, |f| &f.id),
        })
    }

    async fn get_function(&self, function_id: &str) -> Result<Option<Function>> {
        self.record(format!("get_function {}", function_id))?;
        let state = self.state.lock().unwrap();
        Ok(state.functions.iter().find(|f| f.id == function_id).cloned())
    }

    async fn create_function(&self, function: &Function) -> Result<()> {
        self.record(format!("create_function {}", function.id))?;
        self.state.lock().unwrap().functions.push(function.clone());
        Ok(())
    }

    async fn delete_function(&self, function_id: &str) -> Result<()> {
        self.record(format!("delete_function {}", function_id))?;
        self.state
            .lock()
            .unwrap()
            .functions
            .retain(|f| f.id != function_id);
        Ok(())
    }

    async fn list_variables(&self, function_id: &str) -> Result<VariableList> {
        self.record(format!("list_variables {}", function_id))?;
        let state = self.state.lock().unwrap();
        let variables = state.variables.get(function_id).cloned().unwrap_or_default();
        Ok(VariableList {
            total: variables.len() as u64,
            variables,
        })
    }

    async fn create_variable(&self, function_id: &str, variable: &Variable) -> Result<()> {
        self.record(format!("create_variable {}/{}", function_id, variable.key))?;
        self.state
            .lock()
            .unwrap()
            .variables
            .entry(function_id.to_string())
            .or_default()
            .push(variable.clone());
        Ok(())
    }

    async fn get_deployment(
        &self,
        function_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>> {
        self.record(format!("get_deployment {}/{}", function_id, deployment_id))?;
        let state = self.state.lock().unwrap();
        Ok(state
            .deployments
            .get(function_id)
            .and_then(|d| d.iter().find(|x| x.id == deployment_id))
            .cloned())
    }

    async fn download_deployment(&self, function_id: &str, deployment_id: &str) -> Result<Bytes> {
        self.record(format!(
            "download_deployment {}/{}",
            function_id, deployment_id
        ))?;
        let state = self.state.lock().unwrap();
        state
            .deployment_data
            .get(&(function_id.to_string(), deployment_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                MigrateError::api(404, format!("download deployment {}", deployment_id), "not found")
            })
    }

    async fn create_deployment(
        &self,
        function_id: &str,
        code: Bytes,
        entrypoint: &str,
        _commands: &str,
        _activate: bool,
    ) -> Result<Deployment> {
        self.record(format!("create_deployment {}", function_id))?;
        let deployment = {
            let id = self.generate_id();
            let state = self.state.lock().unwrap();
            Deployment {
                id,
                status: state.deployment_status.clone(),
                entrypoint: entrypoint.to_string(),
            }
        };
        let mut state = self.state.lock().unwrap();
        state
            .deployment_data
            .insert((function_id.to_string(), deployment.id.clone()), code);
        state
            .deployments
            .entry(function_id.to_string())
            .or_default()
            .push(deployment.clone());
        Ok(deployment)
    }

    async fn execute_function(&self, function_id: &str, body: String) -> Result<Execution> {
        self.record(format!("execute_function {}", function_id))?;
        let response_body = {
            let handler = self.exec_handler.lock().unwrap();
            match handler.as_ref() {
                Some(h) => h(&body),
                None => json!({ "success": true }).to_string(),
            }
        };
        Ok(Execution {
            id: self.generate_id(),
            status: "completed".to_string(),
            response_body,
            response_status_code: 200,
        })
    }

    async fn list_users(&self, limit: u32) -> Result<UserList> {
        self.record("list_users".to_string())?;
        let state = self.state.lock().unwrap();
        Ok(UserList {
            total: state.users.len() as u64,
            users: page(&state.users, limit, None, |u| &u.id),
        })
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.record(format!("get_user {}", user_id))?;
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn create_user_with_hash(&self, user: &User) -> Result<()> {
        self.record(format!(
            "create_user_with_hash {} {}",
            user.id,
            user.hash.as_deref().unwrap_or("?")
        ))?;
        self.state.lock().unwrap().users.push(user.clone());
        Ok(())
    }

    async fn create_user_plain(&self, user: &User) -> Result<()> {
        self.record(format!("create_user_plain {}", user.id))?;
        let mut created = user.clone();
        created.password = None;
        created.hash = None;
        self.state.lock().unwrap().users.push(created);
        Ok(())
    }

    async fn update_user_status(&self, user_id: &str, status: bool) -> Result<()> {
        self.record(format!("update_user_status {} {}", user_id, status))?;
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.status = status;
        }
        Ok(())
    }

    async fn update_email_verification(&self, user_id: &str, verified: bool) -> Result<()> {
        self.record(format!("update_email_verification {} {}", user_id, verified))?;
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.email_verification = verified;
        }
        Ok(())
    }

    async fn update_phone_verification(&self, user_id: &str, verified: bool) -> Result<()> {
        self.record(format!("update_phone_verification {} {}", user_id, verified))?;
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.phone_verification = verified;
        }
        Ok(())
    }

    async fn update_user_labels(&self, user_id: &str, labels: &[String]) -> Result<()> {
        self.record(format!("update_user_labels {}", user_id))?;
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.labels = labels.to_vec();
        }
        Ok(())
    }

    async fn update_user_prefs(&self, user_id: &str, prefs: &Value) -> Result<()> {
        self.record(format!("update_user_prefs {}", user_id))?;
        let mut state = self.state.lock().unwrap();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.prefs = Some(prefs.clone());
        }
        Ok(())
    }

    async fn list_teams(&self, limit: u32) -> Result<TeamList> {
        self.record("list_teams".to_string())?;
        let state = self.state.lock().unwrap();
        Ok(TeamList {
            total: state.teams.len() as u64,
            teams: page(&state.teams, limit, None, |t| &t.id),
        })
    }

    async fn get_team(&self, team_id: &str) -> Result<Option<Team>> {
        self.record(format!("get_team {}", team_id))?;
        let state = self.state.lock().unwrap();
        Ok(state.teams.iter().find(|t| t.id == team_id).cloned())
    }

    async fn create_team(&self, team: &Team) -> Result<()> {
        self.record(format!("create_team {}", team.id))?;
        self.state.lock().unwrap().teams.push(team.clone());
        Ok(())
    }

    async fn list_memberships(&self, team_id: &str, limit: u32) -> Result<MembershipList> {
        self.record(format!("list_memberships {}", team_id))?;
        let state = self.state.lock().unwrap();
        let all = state.memberships.get(team_id);
        let memberships = all
            .map(|m| page(m, limit, None, |x| x.id.as_str()))
            .unwrap_or_default();
        Ok(MembershipList {
            total: all.map(|m| m.len() as u64).unwrap_or(0),
            memberships,
        })
    }

    async fn create_membership(&self, team_id: &str, email: &str, roles: &[String]) -> Result<()> {
        self.record(format!("create_membership {}/{}", team_id, email))?;
        let id = self.generate_id();
        self.state
            .lock()
            .unwrap()
            .memberships
            .entry(team_id.to_string())
            .or_default()
            .push(Membership {
                id,
                user_id: String::new(),
                user_email: email.to_string(),
                user_name: String::new(),
                roles: roles.to_vec(),
            });
        Ok(())
    }
}
