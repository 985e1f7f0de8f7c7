//! vf-store: object storage abstraction.
//!
//! [`ObjectStore`] covers the S3 multipart-upload protocol (create, sign part
//! URLs, complete, abort) plus the plain object operations the processing
//! worker needs. Two implementations are provided:
//!
//! - [`S3ObjectStore`] -- AWS S3 or any S3-compatible endpoint via `aws-sdk-s3`
//! - [`MemoryObjectStore`] -- in-process store for tests and local runs

pub mod content_type;
pub mod memory;
pub mod s3;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// A part reference handed to multipart completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Metadata returned by [`ObjectStore::head_object`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket all keys live in.
    fn bucket(&self) -> &str;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, key: &str, content_type: &str)
        -> vf_core::Result<String>;

    /// Presign a URL the client can PUT one part to.
    async fn sign_part_upload_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> vf_core::Result<String>;

    /// Assemble the uploaded parts. `parts` must be sorted by part number.
    /// Fails with `NotFound` when the upload no longer exists.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> vf_core::Result<()>;

    /// Discard an upload. Returns [`vf_core::Error::NotFound`] when the store
    /// no longer knows the upload id.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> vf_core::Result<()>;

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str)
        -> vf_core::Result<()>;

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> vf_core::Result<()>;

    /// Stream an object to `path`, returning the number of bytes written.
    async fn download_to_file(&self, key: &str, path: &Path) -> vf_core::Result<u64>;

    /// Object metadata, or `None` when the key does not exist.
    async fn head_object(&self, key: &str) -> vf_core::Result<Option<ObjectMeta>>;
}

/// Build the store selected by `storage.backend`.
pub async fn from_config(
    config: &vf_core::config::StorageConfig,
) -> vf_core::Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "s3" => Ok(Arc::new(S3ObjectStore::from_config(config).await)),
        "memory" => Ok(Arc::new(MemoryObjectStore::new(config.bucket.clone()))),
        other => Err(vf_core::Error::Validation(format!(
            "unknown storage backend: {other}"
        ))),
    }
}
