//! Remote-state storage for Groundwork.
//!
//! This crate provides the `StorageClient` trait over a cloud object-storage
//! service, an HTTP implementation against the Google Cloud Storage JSON API
//! (`GcsClient`), an in-memory implementation for tests (`MemoryStorage`), and
//! the `StateBucketManager` that makes sure the Terraform state bucket exists
//! before provisioning and purges and deletes it on teardown.

pub mod bucket;
pub mod http;
pub mod memory;

pub use bucket::{BucketDescriptor, BucketError, EnsureOutcome, StateBucketManager};
pub use http::{GcsClient, StaticToken, TokenProvider};
pub use memory::MemoryStorage;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("HTTP {code} for {url}")]
    Status { code: u16, url: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("access token unavailable: {0}")]
    Token(String),
}

impl RemoteError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict(_))
    }

    /// Network failures and server-side errors that may succeed on a later run.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Io(_) | RemoteError::Http(_) => true,
            RemoteError::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Attributes of an existing bucket as reported by the storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAttrs {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, rename = "projectNumber")]
    pub project_number: Option<String>,
}

/// Operations on a cloud object-storage service. Every call is an
/// independent round trip; nothing is cached.
pub trait StorageClient: Send + Sync {
    fn bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, RemoteError>;

    fn create_bucket(&self, project: &str, bucket: &str, location: &str)
        -> Result<(), RemoteError>;

    /// Names of every object in the bucket.
    fn list_objects(&self, bucket: &str) -> Result<Vec<String>, RemoteError>;

    fn delete_object(&self, bucket: &str, object: &str) -> Result<(), RemoteError>;

    /// Delete an empty bucket.
    fn delete_bucket(&self, bucket: &str) -> Result<(), RemoteError>;
}
