//! Storage backend trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Bucket already exists: {0}")]
    AlreadyExists(String),

    /// The upload body could not be decoded or failed verification.
    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Other(String),
}

/// Byte stream used for object uploads and downloads.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Outcome of a successful object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub size: u64,
    /// Hex MD5 of the stored bytes.
    pub md5: String,
}

impl PutOutcome {
    /// Quoted ETag value as S3 returns it.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.md5)
    }
}

/// An object opened for reading.
pub struct ObjectReader {
    pub size: u64,
    pub stream: ByteStream,
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// An entry in a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Abstract storage backend for S3-like bucket/object storage
///
/// Buckets and keys passed in have already been validated against path
/// traversal. This trait is object-safe and can be used as
/// `Arc<dyn StorageBackend>`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // === Bucket operations ===

    /// Create a bucket. Fails with `AlreadyExists` if it is already present.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Delete a bucket and everything in it.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// List bucket names, sorted.
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError>;

    // === Object operations ===

    /// Store an object from a byte stream, replacing any previous version.
    ///
    /// Readers observe either the previous complete object or the new one,
    /// never a partial write. If the stream yields an error, or the future is
    /// dropped, nothing is stored.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
    ) -> Result<PutOutcome, StorageError>;

    /// Open an object for streaming.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError>;

    /// Return the object size without opening a stream.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<u64, StorageError>;

    /// Delete a single object.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Recursively list every object in a bucket whose key starts with
    /// `prefix`, sorted by key.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectEntry>, StorageError>;
}
