//! Object store abstraction.
//!
//! Every backend (S3, local directory, in-memory) speaks this narrow set of
//! primitives. The snapshot logic above it never knows which one it talks to.

use std::future::Future;
use std::path::Path;

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Continuation marker for the next page; `None` on the last page.
    pub next: Option<String>,
}

/// Acknowledgement for one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Metadata written to an object after upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub content_disposition: String,
}

/// Storage-level errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    /// A single request against the store failed.
    #[error("Storage request failed: {0}")]
    Request(String),

    /// A part kept failing after every retry.
    #[error("Part {part} failed after {attempts} attempts: {message}")]
    Transient {
        part: i32,
        attempts: u32,
        message: String,
    },

    /// A multipart upload was abandoned instead of committed.
    #[error("Multipart upload of {key} aborted: {acknowledged} of {expected} parts acknowledged{}", cause.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Commit {
        key: String,
        acknowledged: usize,
        expected: usize,
        cause: Option<String>,
    },

    #[error("Storage configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Primitive operations an object store backend provides.
pub trait ObjectStore: Send + Sync + 'static {
    /// List one page of keys under `prefix`.
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> impl Future<Output = StoreResult<KeyPage>> + Send;

    /// Copy object `key` to the local file `dest`.
    fn get_to_file(&self, key: &str, dest: &Path)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Store the local file `src` as `key` in one request.
    fn put_from_file(&self, key: &str, src: &Path)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Open a multipart upload session and return its id.
    fn create_multipart(&self, key: &str) -> impl Future<Output = StoreResult<String>> + Send;

    /// Upload one part of an open session.
    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> impl Future<Output = StoreResult<CompletedPart>> + Send;

    /// Commit a session from its parts, sorted by ascending part number.
    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Abandon a session and discard its parts.
    fn abort_multipart(&self, key: &str, upload_id: &str)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Replace the object's metadata in place, keeping its access policy.
    fn replace_metadata(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Size in bytes of a stored object.
    fn object_size(&self, key: &str) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Public URL of `key`.
    fn public_url(&self, key: &str) -> String;
}
