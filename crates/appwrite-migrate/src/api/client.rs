//! reqwest-based Appwrite client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ProjectConfig;
use crate::error::{MigrateError, Result};

use super::models::*;
use super::ProjectApi;

/// HTTP client scoped to a single Appwrite project.
///
/// Authenticates with an API key via `X-Appwrite-Project` / `X-Appwrite-Key`
/// headers rather than a session token, so it works both from the CLI and
/// inside the cloud worker's serverless runtime.
pub struct AppwriteClient {
    endpoint: String,
    project_id: String,
    api_key: String,
    http: Client,
}

impl AppwriteClient {
    pub fn new(config: &ProjectConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            api_key: config.api_key.clone(),
            http: Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.endpoint, path);
        self.http
            .request(method, url)
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Key", &self.api_key)
            .header("X-Appwrite-Response-Format", "1.4.0")
    }

    /// Extract the server-provided message from an error response body.
    async fn error_message(response: Response) -> String {
        let status = response.status();
        match response.json::<Value>().await {
            Ok(body) => body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status)),
            Err(_) => format!("HTTP {}", status),
        }
    }

    async fn check(&self, response: Response, context: &str) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let message = Self::error_message(response).await;
            Err(MigrateError::api(status, context, message))
        }
    }

    /// GET returning `Ok(None)` on 404 and an error on any other failure.
    async fn get_maybe<T: DeserializeOwned>(&self, path: &str, context: &str) -> Result<Option<T>> {
        debug!("GET {}", path);
        let response = self.request(Method::GET, path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(response, context).await?;
        Ok(Some(response.json().await?))
    }

    /// GET a listing with `limit(n)` and optional `cursorAfter(id)` queries.
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        limit: u32,
        cursor_after: Option<&str>,
        context: &str,
    ) -> Result<T> {
        debug!("GET {} limit={} cursor={:?}", path, limit, cursor_after);
        let mut queries = vec![("queries[]".to_string(), format!("limit({})", limit))];
        if let Some(cursor) = cursor_after {
            queries.push(("queries[]".to_string(), format!("cursorAfter(\"{}\")", cursor)));
        }
        let response = self
            .request(Method::GET, path)
            .query(&queries)
            .send()
            .await?;
        let response = self.check(response, context).await?;
        Ok(response.json().await?)
    }

    async fn post_json(&self, path: &str, body: Value, context: &str) -> Result<Value> {
        debug!("POST {}", path);
        let response = self.request(Method::POST, path).json(&body).send().await?;
        let response = self.check(response, context).await?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    async fn patch_json(&self, path: &str, body: Value, context: &str) -> Result<()> {
        debug!("PATCH {}", path);
        let response = self.request(Method::PATCH, path).json(&body).send().await?;
        self.check(response, context).await?;
        Ok(())
    }

    async fn get_bytes(&self, path: &str, context: &str) -> Result<Bytes> {
        debug!("GET {} (binary)", path);
        let response = self.request(Method::GET, path).send().await?;
        let response = self.check(response, context).await?;
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ProjectApi for AppwriteClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    // ===== Databases =====

    async fn list_databases(&self, limit: u32) -> Result<DatabaseList> {
        self.get_list("/databases", limit, None, "list databases").await
    }

    async fn get_database(&self, database_id: &str) -> Result<Option<Database>> {
        let path = format!("/databases/{}", database_id);
        self.get_maybe(&path, &format!("get database {}", database_id)).await
    }

    async fn create_database(&self, database_id: &str, name: &str, enabled: bool) -> Result<()> {
        self.post_json(
            "/databases",
            json!({ "databaseId": database_id, "name": name, "enabled": enabled }),
            &format!("create database {}", database_id),
        )
        .await?;
        Ok(())
    }

    // ===== Collections =====

    async fn list_collections(&self, database_id: &str, limit: u32) -> Result<CollectionList> {
        let path = format!("/databases/{}/collections", database_id);
        self.get_list(&path, limit, None, &format!("list collections in {}", database_id))
            .await
    }

    async fn get_collection(
        &self,
        database_id: &str,
        collection_id: &str,
    ) -> Result<Option<Collection>> {
        let path = format!("/databases/{}/collections/{}", database_id, collection_id);
        self.get_maybe(&path, &format!("get collection {}", collection_id)).await
    }

    async fn create_collection(&self, database_id: &str, collection: &Collection) -> Result<()> {
        let path = format!("/databases/{}/collections", database_id);
        self.post_json(
            &path,
            json!({
                "collectionId": collection.id,
                "name": collection.name,
                "permissions": collection.permissions,
                "documentSecurity": collection.document_security,
                "enabled": collection.enabled,
            }),
            &format!("create collection {}", collection.id),
        )
        .await?;
        Ok(())
    }

    // ===== Attributes & indexes =====

    async fn list_attributes(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
    ) -> Result<AttributeList> {
        let path = format!(
            "/databases/{}/collections/{}/attributes",
            database_id, collection_id
        );
        self.get_list(&path, limit, None, &format!("list attributes of {}", collection_id))
            .await
    }

    async fn create_attribute(
        &self,
        database_id: &str,
        collection_id: &str,
        attribute: &Attribute,
    ) -> Result<()> {
        let base = format!(
            "/databases/{}/collections/{}/attributes",
            database_id, collection_id
        );
        let context = format!("create attribute {} on {}", attribute.key, collection_id);

        // Each attribute kind has its own creation endpoint. Formatted string
        // attributes (email, url, ip, enum) use the format's endpoint.
        let (path, body) = match attribute.attr_type.as_str() {
            "string" => match attribute.format.as_deref() {
                Some(format @ ("email" | "url" | "ip")) => (
                    format!("{}/{}", base, format),
                    json!({
                        "key": attribute.key,
                        "required": attribute.required,
                        "default": attribute.default,
                        "array": attribute.array,
                    }),
                ),
                Some("enum") => (
                    format!("{}/enum", base),
                    json!({
                        "key": attribute.key,
                        "elements": attribute.elements.clone().unwrap_or_default(),
                        "required": attribute.required,
                        "default": attribute.default,
                        "array": attribute.array,
                    }),
                ),
                _ => (
                    format!("{}/string", base),
                    json!({
                        "key": attribute.key,
                        "size": attribute.size.unwrap_or(255),
                        "required": attribute.required,
                        "default": attribute.default,
                        "array": attribute.array,
                    }),
                ),
            },
            "integer" | "float" => (
                format!("{}/{}", base, attribute.attr_type),
                json!({
                    "key": attribute.key,
                    "required": attribute.required,
                    "min": attribute.min,
                    "max": attribute.max,
                    "default": attribute.default,
                    "array": attribute.array,
                }),
            ),
            "boolean" => (
                format!("{}/boolean", base),
                json!({
                    "key": attribute.key,
                    "required": attribute.required,
                    "default": attribute.default,
                    "array": attribute.array,
                }),
            ),
            "datetime" => (
                format!("{}/datetime", base),
                json!({
                    "key": attribute.key,
                    "required": attribute.required,
                    "default": attribute.default,
                    "array": attribute.array,
                }),
            ),
            "relationship" => (
                format!("{}/relationship", base),
                json!({
                    "relatedCollectionId": attribute.related_collection,
                    "type": attribute.relation_type,
                    "twoWay": attribute.two_way.unwrap_or(false),
                    "key": attribute.key,
                    "twoWayKey": attribute.two_way_key,
                    "onDelete": attribute.on_delete,
                }),
            ),
            other => {
                return Err(MigrateError::transfer(
                    format!("attribute {}", attribute.key),
                    format!("unsupported attribute type: {}", other),
                ));
            }
        };

        self.post_json(&path, body, &context).await?;
        Ok(())
    }

    async fn list_indexes(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
    ) -> Result<IndexList> {
        let path = format!(
            "/databases/{}/collections/{}/indexes",
            database_id, collection_id
        );
        self.get_list(&path, limit, None, &format!("list indexes of {}", collection_id))
            .await
    }

    async fn create_index(
        &self,
        database_id: &str,
        collection_id: &str,
        index: &CollectionIndex,
    ) -> Result<()> {
        let path = format!(
            "/databases/{}/collections/{}/indexes",
            database_id, collection_id
        );
        self.post_json(
            &path,
            json!({
                "key": index.key,
                "type": index.index_type,
                "attributes": index.attributes,
                "orders": index.orders,
            }),
            &format!("create index {} on {}", index.key, collection_id),
        )
        .await?;
        Ok(())
    }

    // ===== Documents =====

    async fn list_documents(
        &self,
        database_id: &str,
        collection_id: &str,
        limit: u32,
        cursor_after: Option<&str>,
    ) -> Result<DocumentList> {
        let path = format!(
            "/databases/{}/collections/{}/documents",
            database_id, collection_id
        );
        self.get_list(
            &path,
            limit,
            cursor_after,
            &format!("list documents of {}", collection_id),
        )
        .await
    }

    async fn get_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Option<Document>> {
        let path = format!(
            "/databases/{}/collections/{}/documents/{}",
            database_id, collection_id, document_id
        );
        self.get_maybe(&path, &format!("get document {}", document_id)).await
    }

    async fn create_document(
        &self,
        database_id: &str,
        collection_id: &str,
        document_id: &str,
        data: serde_json::Map<String, Value>,
        permissions: &[String],
    ) -> Result<()> {
        let path = format!(
            "/databases/{}/collections/{}/documents",
            database_id, collection_id
        );
        self.post_json(
            &path,
            json!({
                "documentId": document_id,
                "data": data,
                "permissions": permissions,
            }),
            &format!("create document {}", document_id),
        )
        .await?;
        Ok(())
    }

    // ===== Storage =====

    async fn list_buckets(&self, limit: u32) -> Result<BucketList> {
        self.get_list("/storage/buckets", limit, None, "list buckets").await
    }

    async fn get_bucket(&self, bucket_id: &str) -> Result<Option<Bucket>> {
        let path = format!("/storage/buckets/{}", bucket_id);
        self.get_maybe(&path, &format!("get bucket {}", bucket_id)).await
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<()> {
        self.post_json(
            "/storage/buckets",
            json!({
                "bucketId": bucket.id,
                "name": bucket.name,
                "permissions": bucket.permissions,
                "fileSecurity": bucket.file_security,
                "enabled": bucket.enabled,
                "maximumFileSize": bucket.maximum_file_size,
                "allowedFileExtensions": bucket.allowed_file_extensions,
                "compression": bucket.compression,
                "encryption": bucket.encryption,
                "antivirus": bucket.antivirus,
            }),
            &format!("create bucket {}", bucket.id),
        )
        .await?;
        Ok(())
    }

    async fn list_files(
        &self,
        bucket_id: &str,
        limit: u32,
        cursor_after: Option<&str>,
    ) -> Result<FileList> {
        let path = format!("/storage/buckets/{}/files", bucket_id);
        self.get_list(&path, limit, cursor_after, &format!("list files of {}", bucket_id))
            .await
    }

    async fn get_file(&self, bucket_id: &str, file_id: &str) -> Result<Option<StorageFile>> {
        let path = format!("/storage/buckets/{}/files/{}", bucket_id, file_id);
        self.get_maybe(&path, &format!("get file {}", file_id)).await
    }

    async fn download_file(&self, bucket_id: &str, file_id: &str) -> Result<Bytes> {
        let path = format!("/storage/buckets/{}/files/{}/download", bucket_id, file_id);
        self.get_bytes(&path, &format!("download file {}", file_id)).await
    }

    async fn upload_file(
        &self,
        bucket_id: &str,
        file_id: &str,
        file_name: &str,
        data: Bytes,
        permissions: &[String],
    ) -> Result<()> {
        // Raw multipart request instead of an SDK upload helper: the SDK's
        // chunked upload mishandles binary payloads in serverless runtimes.
        let path = format!("/storage/buckets/{}/files", bucket_id);
        let context = format!("upload file {}", file_id);

        let mut form = Form::new()
            .text("fileId", file_id.to_string())
            .part(
                "file",
                Part::bytes(data.to_vec()).file_name(file_name.to_string()),
            );
        for (i, permission) in permissions.iter().enumerate() {
            form = form.text(format!("permissions[{}]", i), permission.clone());
        }

        let response = self
            .request(Method::POST, &path)
            .multipart(form)
            .send()
            .await?;
        self.check(response, &context).await?;
        Ok(())
    }

    // ===== Functions =====

    async fn list_functions(&self, limit: u32) -> Result<FunctionList> {
        self.get_list("/functions", limit, None, "list functions").await
    }

    async fn get_function(&self, function_id: &str) -> Result<Option<Function>> {
        let path = format!("/functions/{}", function_id);
        self.get_maybe(&path, &format!("get function {}", function_id)).await
    }

    async fn create_function(&self, function: &Function) -> Result<()> {
        self.post_json(
            "/functions",
            json!({
                "functionId": function.id,
                "name": function.name,
                "runtime": function.runtime,
                "execute": function.execute,
                "events": function.events,
                "schedule": function.schedule,
                "timeout": function.timeout,
                "enabled": function.enabled,
                "logging": function.logging,
                "entrypoint": function.entrypoint,
                "commands": function.commands,
                "installationId": function.installation_id,
                "providerRepositoryId": function.provider_repository_id,
                "providerBranch": function.provider_branch,
                "providerRootDirectory": function.provider_root_directory,
                "providerSilentMode": function.provider_silent_mode,
            }),
            &format!("create function {}", function.id),
        )
        .await?;
        Ok(())
    }

    async fn delete_function(&self, function_id: &str) -> Result<()> {
        let path = format!("/functions/{}", function_id);
        let context = format!("delete function {}", function_id);
        let response = self.request(Method::DELETE, &path).send().await?;
        self.check(response, &context).await?;
        Ok(())
    }

    async fn list_variables(&self, function_id: &str) -> Result<VariableList> {
        let path = format!("/functions/{}/variables", function_id);
        let context = format!("list variables of {}", function_id);
        debug!("GET {}", path);
        let response = self.request(Method::GET, &path).send().await?;
        let response = self.check(response, &context).await?;
        Ok(response.json().await?)
    }

    async fn create_variable(&self, function_id: &str, variable: &Variable) -> Result<()> {
        let path = format!("/functions/{}/variables", function_id);
        self.post_json(
            &path,
            json!({ "key": variable.key, "value": variable.value }),
            &format!("create variable {} on {}", variable.key, function_id),
        )
        .await?;
        Ok(())
    }

    async fn get_deployment(
        &self,
        function_id: &str,
        deployment_id: &str,
    ) -> Result<Option<Deployment>> {
        let path = format!("/functions/{}/deployments/{}", function_id, deployment_id);
        self.get_maybe(&path, &format!("get deployment {}", deployment_id)).await
    }

    async fn download_deployment(&self, function_id: &str, deployment_id: &str) -> Result<Bytes> {
        let path = format!(
            "/functions/{}/deployments/{}/download",
            function_id, deployment_id
        );
        self.get_bytes(&path, &format!("download deployment {}", deployment_id))
            .await
    }

    async fn create_deployment(
        &self,
        function_id: &str,
        code: Bytes,
        entrypoint: &str,
        commands: &str,
        activate: bool,
    ) -> Result<Deployment> {
        let path = format!("/functions/{}/deployments", function_id);
        let context = format!("create deployment for {}", function_id);

        let form = Form::new()
            .text("entrypoint", entrypoint.to_string())
            .text("commands", commands.to_string())
            .text("activate", activate.to_string())
            .part(
                "code",
                Part::bytes(code.to_vec()).file_name("code.tar.gz"),
            );

        let response = self
            .request(Method::POST, &path)
            .multipart(form)
            .send()
            .await?;
        let response = self.check(response, &context).await?;
        Ok(response.json().await?)
    }

    async fn execute_function(&self, function_id: &str, body: String) -> Result<Execution> {
        let path = format!("/functions/{}/executions", function_id);
        let value = self
            .post_json(
                &path,
                json!({ "body": body, "async": false }),
                &format!("execute function {}", function_id),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    // ===== Users =====

    async fn list_users(&self, limit: u32) -> Result<UserList> {
        self.get_list("/users", limit, None, "list users").await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let path = format!("/users/{}", user_id);
        self.get_maybe(&path, &format!("get user {}", user_id)).await
    }

    async fn create_user_with_hash(&self, user: &User) -> Result<()> {
        let scheme = user.hash.as_deref().unwrap_or_default();
        // Import endpoints are named after the hash scheme, e.g. /users/bcrypt.
        let path = format!("/users/{}", scheme);
        let mut body = json!({
            "userId": user.id,
            "email": user.email,
            "password": user.password,
            "name": user.name,
        });
        if let Some(options) = &user.hash_options {
            body["passwordOptions"] = options.clone();
        }
        self.post_json(&path, body, &format!("create user {} ({})", user.id, scheme))
            .await?;
        Ok(())
    }

    async fn create_user_plain(&self, user: &User) -> Result<()> {
        let mut body = json!({
            "userId": user.id,
            "name": user.name,
        });
        if !user.email.is_empty() {
            body["email"] = json!(user.email);
        }
        if !user.phone.is_empty() {
            body["phone"] = json!(user.phone);
        }
        self.post_json("/users", body, &format!("create user {}", user.id))
            .await?;
        Ok(())
    }

    async fn update_user_status(&self, user_id: &str, status: bool) -> Result<()> {
        let path = format!("/users/{}/status", user_id);
        self.patch_json(
            &path,
            json!({ "status": status }),
            &format!("update status of user {}", user_id),
        )
        .await
    }

    async fn update_email_verification(&self, user_id: &str, verified: bool) -> Result<()> {
        let path = format!("/users/{}/verification", user_id);
        self.patch_json(
            &path,
            json!({ "emailVerification": verified }),
            &format!("update email verification of user {}", user_id),
        )
        .await
    }

    async fn update_phone_verification(&self, user_id: &str, verified: bool) -> Result<()> {
        let path = format!("/users/{}/verification/phone", user_id);
        self.patch_json(
            &path,
            json!({ "phoneVerification": verified }),
            &format!("update phone verification of user {}", user_id),
        )
        .await
    }

    async fn update_user_labels(&self, user_id: &str, labels: &[String]) -> Result<()> {
        let path = format!("/users/{}/labels", user_id);
        // Labels use PUT, not PATCH.
        let context = format!("update labels of user {}", user_id);
        let response = self
            .request(Method::PUT, &path)
            .json(&json!({ "labels": labels }))
            .send()
            .await?;
        self.check(response, &context).await?;
        Ok(())
    }

    async fn update_user_prefs(&self, user_id: &str, prefs: &Value) -> Result<()> {
        let path = format!("/users/{}/prefs", user_id);
        self.patch_json(
            &path,
            json!({ "prefs": prefs }),
            &format!("update prefs of user {}", user_id),
        )
        .await
    }

    // ===== Teams =====

    async fn list_teams(&self, limit: u32) -> Result<TeamList> {
        self.get_list("/teams", limit, None, "list teams").await
    }

    async fn get_team(&self, team_id: &str) -> Result<Option<Team>> {
        let path = format!("/teams/{}", team_id);
        self.get_maybe(&path, &format!("get team {}", team_id)).await
    }

    async fn create_team(&self, team: &Team) -> Result<()> {
        self.post_json(
            "/teams",
            json!({ "teamId": team.id, "name": team.name }),
            &format!("create team {}", team.id),
        )
        .await?;
        Ok(())
    }

    async fn list_memberships(&self, team_id: &str, limit: u32) -> Result<MembershipList> {
        let path = format!("/teams/{}/memberships", team_id);
        self.get_list(&path, limit, None, &format!("list memberships of {}", team_id))
            .await
    }

    async fn create_membership(&self, team_id: &str, email: &str, roles: &[String]) -> Result<()> {
        let path = format!("/teams/{}/memberships", team_id);
        self.post_json(
            &path,
            json!({
                "email": email,
                "roles": roles,
                // Server-side invites still require a redirect URL field.
                "url": format!("{}/", self.endpoint),
            }),
            &format!("invite {} to team {}", email, team_id),
        )
        .await?;
        Ok(())
    }
}
