//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Appwrite API call failed with a non-404 status.
    #[error("API error ({status}) during {context}: {message}")]
    Api {
        status: u16,
        context: String,
        message: String,
    },

    /// Source project enumeration failed - no partial plan is returned.
    #[error("Scan failed: {0}")]
    Scan(String),

    /// Transfer failed for a specific resource.
    #[error("Transfer failed for {resource}: {message}")]
    Transfer { resource: String, message: String },

    /// Cloud worker could not be deployed or never became executable.
    /// Callers treat this as "cloud proxy unavailable - fall back to local transfer".
    #[error("Worker deployment failed: {0}")]
    WorkerDeploy(String),

    /// The deployed worker reported a failed file transfer.
    #[error("Worker execution failed: {0}")]
    WorkerExecution(String),

    /// Checkpoint store read/write error.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (checkpoint file, archive assembly).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, user stop request).
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create an Api error with context about which call failed.
    pub fn api(status: u16, context: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Api {
            status,
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a Transfer error.
    pub fn transfer(resource: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = MigrateError::api(500, "create database db1", "internal error");
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("create database db1"));
    }

    #[test]
    fn test_cancelled_exit_code() {
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 2);
        assert_eq!(MigrateError::Scan("x".into()).exit_code(), 1);
    }
}
