use crate::config::S3Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Characters left unescaped in a copy source: unreserved set plus `/`.
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// An object read back from the store
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    /// User metadata attached at upload time (keys are lower-case)
    pub metadata: HashMap<String, String>,
    pub e_tag: Option<String>,
}

/// Blob storage addressed by bucket + key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object; `None` when the key does not exist
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    /// Delete an object. Deleting an absent key is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Copy an object. Fails when the source does not exist.
    async fn copy(&self, src_bucket: &str, src_key: &str, dst_bucket: &str, dst_key: &str)
        -> Result<()>;

    /// Mint a time-boxed read URL for an object
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            primary_bucket = %config.primary_bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self { client })
    }

    /// Get the S3 client
    pub fn client(&self) -> &S3Client {
        &self.client
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    match err {
        SdkError::ServiceError(service_err) => service_err.raw().status().as_u16() == 404,
        _ => false,
    }
}

/// Build the `CopySource` header value: bucket plus the percent-encoded key
fn copy_source(bucket: &str, key: &str) -> String {
    format!(
        "{}/{}",
        bucket,
        utf8_percent_encode(key, COPY_SOURCE_ENCODE_SET)
    )
}

/// Error reported when a copy source does not exist
pub fn missing_copy_source(bucket: &str, key: &str) -> anyhow::Error {
    anyhow!("Copy source not found: {bucket}/{key}")
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e).context("Failed to get object from S3"),
        };

        let content_type = output.content_type().map(str::to_string);
        let e_tag = output.e_tag().map(str::to_string);
        let metadata = output.metadata().cloned().unwrap_or_default();

        let bytes = output
            .body
            .collect()
            .await
            .context("Failed to read object body")?
            .into_bytes();

        debug!(size_bytes = bytes.len(), "Object read from S3");

        Ok(Some(StoredObject {
            bytes,
            content_type,
            metadata,
            e_tag,
        }))
    }

    #[instrument(skip(self, bytes, metadata), fields(size_bytes = bytes.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .context("Failed to upload object to S3")?;

        debug!("Object written to S3");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        match self.client.delete_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).context("Failed to delete object from S3"),
        }
    }

    #[instrument(skip(self))]
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        let result = self
            .client
            .copy_object()
            .copy_source(copy_source(src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(missing_copy_source(src_bucket, src_key)),
            Err(e) => Err(e).context("Failed to copy object in S3"),
        }
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        let presigning_config =
            PresigningConfig::expires_in(ttl).context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_source_encoding() {
        assert_eq!(copy_source("primary", "abc.png"), "primary/abc.png");
        assert_eq!(
            copy_source("primary", "recycled/a@b.com/my photo.png"),
            "primary/recycled/a%40b.com/my%20photo.png"
        );
    }
}
