//! In-process [`ObjectStore`] used by tests and the `memory` backend.
//!
//! Behaves like S3 where the pipeline depends on it: upload ids are opaque,
//! completion checks part numbers and etags, aborting an unknown upload is
//! `NotFound`. [`MemoryObjectStore::put_part`] stands in for the client's
//! direct PUT to a signed URL.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use uuid::Uuid;

use vf_core::Error;

use crate::{CompletedPart, ObjectMeta, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    fail_next: HashSet<String>,
    fail_always: HashSet<String>,
    calls: HashMap<String, usize>,
}

impl Inner {
    fn enter(&mut self, operation: &str) -> vf_core::Result<()> {
        *self.calls.entry(operation.to_string()).or_default() += 1;
        if self.fail_next.remove(operation) || self.fail_always.contains(operation) {
            return Err(Error::storage(operation, "injected failure"));
        }
        Ok(())
    }
}

/// Thread-safe in-memory object store.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Upload one part, as a client would through a signed URL. Returns the
    /// part's etag.
    pub fn put_part(
        &self,
        upload_id: &str,
        part_number: u32,
        body: impl Into<Bytes>,
    ) -> vf_core::Result<String> {
        let body = body.into();
        let mut inner = self.inner.lock();
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| Error::not_found("upload", upload_id))?;
        let etag = format!("\"{}-{part_number}-{}\"", &upload_id[..8.min(upload_id.len())], body.len());
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    /// Make the next call of `operation` fail with an `ExternalStorage` error.
    pub fn fail_next(&self, operation: &str) {
        self.inner.lock().fail_next.insert(operation.to_string());
    }

    /// Make every call of `operation` fail until [`Self::clear_failures`].
    pub fn fail_always(&self, operation: &str) {
        self.inner.lock().fail_always.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.fail_next.clear();
        inner.fail_always.clear();
    }

    /// How many times `operation` has been invoked.
    pub fn call_count(&self, operation: &str) -> usize {
        self.inner.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Store an object directly, bypassing failure injection.
    pub fn insert_object(&self, key: &str, body: impl Into<Bytes>, content_type: &str) {
        self.inner.lock().objects.insert(
            key.to_string(),
            StoredObject {
                body: body.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.inner.lock().objects.get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .objects
            .get(key)
            .map(|o| o.content_type.clone())
    }

    /// Sorted keys under `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn pending_uploads(&self) -> usize {
        self.inner.lock().uploads.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> vf_core::Result<String> {
        let mut inner = self.inner.lock();
        inner.enter("create_multipart_upload")?;
        let upload_id = Uuid::new_v4().simple().to_string();
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn sign_part_upload_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> vf_core::Result<String> {
        let mut inner = self.inner.lock();
        inner.enter("sign_part_upload_url")?;
        if !inner.uploads.contains_key(upload_id) {
            return Err(Error::not_found("upload", upload_id));
        }
        Ok(format!(
            "memory://{}/{key}?uploadId={upload_id}&partNumber={part_number}&expires={}",
            self.bucket,
            ttl.as_secs()
        ))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> vf_core::Result<()> {
        const OP: &str = "complete_multipart_upload";
        let mut inner = self.inner.lock();
        inner.enter(OP)?;

        let upload = inner
            .uploads
            .get(upload_id)
            .ok_or_else(|| Error::not_found("upload", upload_id))?;
        if upload.key != key {
            return Err(Error::storage(OP, format!("upload {upload_id} is not for {key}")));
        }
        if parts.is_empty() {
            return Err(Error::storage(OP, "MalformedXML: no parts"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(Error::storage(OP, "InvalidPartOrder"));
        }

        let mut body = BytesMut::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((etag, data)) if *etag == part.etag => body.extend_from_slice(data),
                _ => {
                    return Err(Error::storage(
                        OP,
                        format!("InvalidPart: part {} not uploaded or etag mismatch", part.part_number),
                    ))
                }
            }
        }

        let content_type = upload.content_type.clone();
        inner.uploads.remove(upload_id);
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                body: body.freeze(),
                content_type,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> vf_core::Result<()> {
        let mut inner = self.inner.lock();
        inner.enter("abort_multipart_upload")?;
        inner
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("upload", upload_id))
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> vf_core::Result<()> {
        let mut inner = self.inner.lock();
        inner.enter("put_object")?;
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> vf_core::Result<()> {
        self.inner.lock().enter("put_file")?;
        let body = tokio::fs::read(path).await?;
        self.inner.lock().objects.insert(
            key.to_string(),
            StoredObject {
                body: Bytes::from(body),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download_to_file(&self, key: &str, path: &Path) -> vf_core::Result<u64> {
        let body = {
            let mut inner = self.inner.lock();
            inner.enter("download_to_file")?;
            inner
                .objects
                .get(key)
                .map(|o| o.body.clone())
                .ok_or_else(|| Error::storage("download_to_file", format!("NoSuchKey: {key}")))?
        };
        tokio::fs::write(path, &body).await?;
        Ok(body.len() as u64)
    }

    async fn head_object(&self, key: &str) -> vf_core::Result<Option<ObjectMeta>> {
        let mut inner = self.inner.lock();
        inner.enter("head_object")?;
        Ok(inner.objects.get(key).map(|o| ObjectMeta {
            key: key.to_string(),
            size: o.body.len() as u64,
            content_type: Some(o.content_type.clone()),
        }))
    }
}
