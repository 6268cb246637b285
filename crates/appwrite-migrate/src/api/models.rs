//! Typed Appwrite resource descriptors.
//!
//! These mirror the JSON shapes returned by the Appwrite REST API. Fields the
//! engine never reads are omitted; serde ignores unknown fields by default,
//! so descriptors survive API additions. Attribute `min`/`max`/`default`
//! are kept as loose [`serde_json::Value`] because the source may carry
//! malformed or non-finite constraints that the executor sanitizes before
//! re-creation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Database descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(rename = "$id")]
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Collection descriptor with its permission/security configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$databaseId", default)]
    pub database_id: String,
    #[serde(rename = "$permissions", default)]
    pub permissions: Vec<String>,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub document_security: bool,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub indexes: Vec<CollectionIndex>,
}

/// Attribute descriptor covering every scalar kind plus relationships.
///
/// The `attr_type` string is one of: string, integer, float, boolean,
/// datetime, relationship. String attributes additionally carry a `format`
/// (email, url, ip, enum) when they were created through a formatted
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub key: String,
    #[serde(rename = "type")]
    pub attr_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_way: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_way_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
}

impl Attribute {
    /// Whether this attribute references another collection.
    pub fn is_relationship(&self) -> bool {
        self.attr_type == "relationship"
    }
}

/// Index descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionIndex {
    pub key: String,
    #[serde(rename = "type")]
    pub index_type: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub orders: Vec<String>,
}

/// Document: an opaque JSON object carrying `$`-prefixed system fields
/// alongside user data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document(pub serde_json::Map<String, Value>);

impl Document {
    pub fn id(&self) -> &str {
        self.0.get("$id").and_then(Value::as_str).unwrap_or("")
    }

    pub fn permissions(&self) -> Vec<String> {
        self.0
            .get("$permissions")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// User data with system-managed fields stripped, ready for re-creation.
    pub fn payload(&self) -> serde_json::Map<String, Value> {
        const SYSTEM_FIELDS: [&str; 6] = [
            "$id",
            "$databaseId",
            "$collectionId",
            "$createdAt",
            "$updatedAt",
            "$permissions",
        ];
        self.0
            .iter()
            .filter(|(k, _)| !SYSTEM_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Storage bucket descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "$permissions", default)]
    pub permissions: Vec<String>,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub file_security: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_file_size: Option<u64>,
    #[serde(default)]
    pub allowed_file_extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(default)]
    pub encryption: bool,
    #[serde(default)]
    pub antivirus: bool,
}

/// File metadata descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFile {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(rename = "bucketId", default)]
    pub bucket_id: String,
    #[serde(rename = "$permissions", default)]
    pub permissions: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size_original: u64,
}

/// Function descriptor with full runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    #[serde(rename = "$id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub execute: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub logging: bool,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub commands: String,
    /// Active deployment ID, empty when the function was never deployed.
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub installation_id: String,
    #[serde(default)]
    pub provider_repository_id: String,
    #[serde(default)]
    pub provider_branch: String,
    #[serde(default)]
    pub provider_root_directory: String,
    #[serde(default)]
    pub provider_silent_mode: bool,
}

/// Function environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    #[serde(rename = "$id")]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Deployment descriptor; `status` is one of pending/processing/building/ready/failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub entrypoint: String,
}

/// Synchronous function execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub response_status_code: u16,
}

/// User account descriptor. `password`/`hash` are only present when the API
/// key has access to password hashes and the account has one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_options: Option<Value>,
    #[serde(default = "default_true")]
    pub status: bool,
    #[serde(default)]
    pub email_verification: bool,
    #[serde(default)]
    pub phone_verification: bool,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefs: Option<Value>,
}

/// Team descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    #[serde(rename = "$id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefs: Option<Value>,
}

/// Team membership descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

// ===== List envelopes =====
//
// Appwrite wraps each listing in `{ "total": n, "<kind>": [...] }`.

macro_rules! list_envelope {
    ($name:ident, $field:ident, $item:ty) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub total: u64,
            #[serde(default)]
            pub $field: Vec<$item>,
        }
    };
}

list_envelope!(DatabaseList, databases, Database);
list_envelope!(CollectionList, collections, Collection);
list_envelope!(AttributeList, attributes, Attribute);
list_envelope!(IndexList, indexes, CollectionIndex);
list_envelope!(DocumentList, documents, Document);
list_envelope!(BucketList, buckets, Bucket);
list_envelope!(FileList, files, StorageFile);
list_envelope!(FunctionList, functions, Function);
list_envelope!(VariableList, variables, Variable);
list_envelope!(UserList, users, User);
list_envelope!(TeamList, teams, Team);
list_envelope!(MembershipList, memberships, Membership);

fn default_true() -> bool {
    true
}
