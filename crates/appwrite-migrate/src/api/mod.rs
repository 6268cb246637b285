//! Appwrite REST API abstraction.
//!
//! [`ProjectApi`] is the seam between the migration engine and a concrete
//! Appwrite project. Production code uses [`AppwriteClient`] (reqwest);
//! tests use [`MockProjectApi`] with an in-memory resource map and an
//! operation log.
//!
//! Every `get_*` operation distinguishes "absent" from "broken": it returns
//! `Ok(None)` only on HTTP 404, and an error for any other failure. The
//! executor's idempotent-creation pattern ("get by ID; if not found, create")
//! relies on this so that a transient outage never masquerades as absence
//! and triggers a duplicate-creation attempt.

mod client;
pub mod mock;
pub mod models;

pub use client::AppwriteClient;
pub use mock::MockProjectApi;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use models::{
    Attribute, AttributeList, Bucket, BucketList, Collection, CollectionIndex, CollectionList,
    Database, DatabaseList, Deployment, Document, DocumentList, Execution, FileList, Function,
    FunctionList, IndexList, MembershipList, StorageFile, Team, TeamList, User, UserList,
    Variable, VariableList,
};

/// Client operations against one Appwrite project.
///
/// The engine holds two instances: one scoped to the source project
/// (read-only use) and one to the destination.
#[async_trait]
pub trait ProjectApi: Send + Sync {
    /// Project identifier this client is scoped to.
    fn project_id(&self) -> &str;

    // ===== Databases =====

    async fn list_databases(&self, limit: u32) -> Result<DatabaseList>;
    async fn get_database(&self, database_id: &str) -> Result<Option<Database>>;
    async fn create_database(&self, database_id: &str, name: &str, enabled: bool) -> Result<()>;

    // ===== Collections =====

    async fn list_collections(&self, database_id: &str, limit: u32) -> Result<CollectionList>;
    async fn get_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Option<Collection>>;
    async fn create_collection(&self, database_id: &str, collection: &Collection) -> Result<()>;

    // ===== Attributes & indexes =====

    async fn list_attributes(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
    ) -> Result<AttributeList>;
    async fn create_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: &Attribute,
    ) -> Result<()>;
    async fn list_indexes(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
    ) -> Result<IndexList>;
    async fn create_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index: &CollectionIndex,
    ) -> Result<()>;

    // ===== Documents =====

    async fn list_documents(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
        cursor_after: Option<&str>,
    ) -> Result<DocumentList>;
    async fn get_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>>;
    async fn create_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
        data: serde_json::Map<String, Value>,
        permissions: &[String],
    ) -> Result<()>;

    // ===== Storage =====

    async fn list_buckets(&self, limit: u32) -> Result<BucketList>;
    async fn get_bucket(&self, bucket_id: &str) -> Result<Option<Bucket>>;
    async fn create_bucket(&self, bucket: &Bucket) -> Result<()>;
    async fn list_files(
        &self,
        bucket_id: &str,
        limit: u32,
        cursor_after: Option<&str>,
    ) -> Result<FileList>;
    async fn get_file(&self, bucket_id: &str, file_id: &str) -> Result<Option<StorageFile>>;
    /// Download the full binary content of a file.
    async fn download_file(&self, bucket_id: &str, file_id: &str) -> Result<Bytes>;
    /// Upload file content via the raw multipart endpoint, preserving the
    /// original ID and permission list.
    async fn upload_file(
        &self,
        bucket_id: &str,
        file_id: &str,
        file_name: &str,
        data: Bytes,
        permissions: &[String],
    ) -> Result<()>;

    // ===== Functions =====

    async fn list_functions(&self, limit: u32) -> Result<FunctionList>;
    async fn get_function(&self, function_id: &str) -> Result<Option<Function>>;
    async fn create_function(&self, function: &Function) -> Result<()>;
    async fn delete_function(&self, function_id: &str) -> Result<()>;
    async fn list_variables(&self, function_id: &str) -> Result<VariableList>;
    async fn create_variable(&self, function_id: &str, variable: &Variable) -> Result<()>;
    async fn get_deployment(
        &self,
        function_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>>;
    /// Download a deployment's code archive as a binary buffer.
    async fn download_deployment(&self, function_id: &str, deployment_id: &str) -> Result<Bytes>;
    /// Upload a code archive via the raw multipart endpoint and optionally
    /// activate it.
    async fn create_deployment(
        &self,
        function_id: &str,
        code: Bytes,
        entrypoint: &str,
        commands: &str,
        activate: bool,
    ) -> Result<Deployment>;
    /// Synchronous function execution; the call blocks until the remote
    /// function returns.
    async fn execute_function(&self, function_id: &str, body: String) -> Result<Execution>;

    // ===== Users =====

    async fn list_users(&self, limit: u32) -> Result<UserList>;
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    /// Create a user from a portable password hash. The `hash` field of the
    /// descriptor names the scheme, `password` carries the hashed value.
    async fn create_user_with_hash(&self, user: &User) -> Result<()>;
    /// Create a passwordless account; the end user must reset credentials.
    async fn create_user_plain(&self, user: &User) -> Result<()>;
    async fn update_user_status(&self, user_id: &str, status: bool) -> Result<()>;
    async fn update_email_verification(&self, user_id: &str, verified: bool) -> Result<()>;
    async fn update_phone_verification(&self, user_id: &str, verified: bool) -> Result<()>;
    async fn update_user_labels(&self, user_id: &str, labels: &[String]) -> Result<()>;
    async fn update_user_prefs(&self, user_id: &str, prefs: &Value) -> Result<()>;

    // ===== Teams =====

    async fn list_teams(&self, limit: u32) -> Result<TeamList>;
    async fn get_team(&self, team_id: &str) -> Result<Option<Team>>;
    async fn create_team(&self, team: &Team) -> Result<()>;
    async fn list_memberships(&self, team_id: &str, limit: u32) -> Result<MembershipList>;
    /// Invite a member by email with the given role list.
    async fn create_membership(&self, team_id: &str, email: &str, roles: &[String]) -> Result<()>;
}

/// Password hash schemes Appwrite can import directly.
pub const SUPPORTED_HASH_SCHEMES: [&str; 7] = [
    "argon2",
    "bcrypt",
    "md5",
    "phpass",
    "scrypt",
    "scrypt-modified",
    "sha",
];

/// Whether a user record carries a portable hash the destination can import.
pub fn has_portable_hash(user: &User) -> bool {
    match (&user.hash, &user.password) {
        (Some(scheme), Some(password)) if !password.is_empty() => {
            SUPPORTED_HASH_SCHEMES.contains(&scheme.as_str())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(hash: Option<&str>, password: Option<&str>) -> User {
        User {
            id: "u1".into(),
            name: String::new(),
            email: "u1@example.com".into(),
            phone: String::new(),
            password: password.map(str::to_string),
            hash: hash.map(str::to_string),
            hash_options: None,
            status: true,
            email_verification: false,
            phone_verification: false,
            labels: vec![],
            prefs: None,
        }
    }

    #[test]
    fn test_portable_hash_detection() {
        assert!(has_portable_hash(&user_with(Some("bcrypt"), Some("$2a$..."))));
        assert!(has_portable_hash(&user_with(Some("argon2"), Some("$argon2id$..."))));
        assert!(!has_portable_hash(&user_with(Some("unknown-kdf"), Some("xx"))));
        assert!(!has_portable_hash(&user_with(Some("bcrypt"), None)));
        assert!(!has_portable_hash(&user_with(Some("bcrypt"), Some(""))));
        assert!(!has_portable_hash(&user_with(None, None)));
    }
}
