//! [`ObjectStore`] backed by AWS S3 (or an S3-compatible endpoint).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use vf_core::config::StorageConfig;
use vf_core::Error;

use crate::{CompletedPart, ObjectMeta, ObjectStore};

/// S3 client bound to one bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the storage config.
    ///
    /// Explicit credentials are used when both keys are set; otherwise the
    /// default AWS credential chain applies.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "vodforge_config",
            );
            loader = loader.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 object store configured"
        );
        Self::new(Client::from_conf(s3_config), config.bucket.clone())
    }
}

fn part_number_i32(operation: &str, part_number: u32) -> vf_core::Result<i32> {
    i32::try_from(part_number)
        .map_err(|_| Error::storage(operation, format!("part number {part_number} out of range")))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> vf_core::Result<String> {
        const OP: &str = "create_multipart_upload";
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Error::storage(OP, e.into_service_error()))?;

        resp.upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::storage(OP, "response carried no upload id"))
    }

    async fn sign_part_upload_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> vf_core::Result<String> {
        const OP: &str = "sign_part_upload_url";
        let presigning = PresigningConfig::builder()
            .expires_in(ttl)
            .build()
            .map_err(|e| Error::storage(OP, e))?;

        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number_i32(OP, part_number)?)
            .presigned(presigning)
            .await
            .map_err(|e| Error::storage(OP, e))?;

        Ok(request.uri().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> vf_core::Result<()> {
        const OP: &str = "complete_multipart_upload";
        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            completed.push(
                S3CompletedPart::builder()
                    .part_number(part_number_i32(OP, part.part_number)?)
                    .e_tag(&part.etag)
                    .build(),
            );
        }

        match self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("NoSuchUpload") => Err(Error::not_found("upload", upload_id)),
            Err(e) => {
                let code = e.code().unwrap_or("unknown").to_string();
                Err(Error::storage(OP, format!("{code}: {}", e.into_service_error())))
            }
        }
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> vf_core::Result<()> {
        match self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("NoSuchUpload") => Err(Error::not_found("upload", upload_id)),
            Err(e) => Err(Error::storage(
                "abort_multipart_upload",
                e.into_service_error(),
            )),
        }
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> vf_core::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::storage("put_object", e.into_service_error()))?;
        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> vf_core::Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| Error::storage("put_file", format!("{}: {e}", path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::storage("put_file", e.into_service_error()))?;
        Ok(())
    }

    async fn download_to_file(&self, key: &str, path: &Path) -> vf_core::Result<u64> {
        const OP: &str = "download_to_file";
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Error::storage(OP, e.into_service_error()))?;

        let mut body = resp.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.try_next().await.map_err(|e| Error::storage(OP, e))? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn head_object(&self, key: &str) -> vf_core::Result<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                content_type: resp.content_type().map(str::to_string),
            })),
            Err(e) => match e.into_service_error() {
                se if se.is_not_found() => Ok(None),
                se => Err(Error::storage("head_object", se)),
            },
        }
    }
}
