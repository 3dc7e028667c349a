// tablebackup/src/storage/mod.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::DisplayErrorContext;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::S3StorageConfig;
use crate::errors::{AppError, Result};

/// Key-addressed object storage used as the archive for dump files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()>;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
    async fn get_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()>;
}

/// Where a phase archives to or restores from.
#[derive(Clone, Copy)]
pub struct BlobTarget<'a> {
    pub store: &'a dyn BlobStore,
    pub bucket: &'a str,
    pub key_prefix: &'a str,
}

pub struct S3BlobStore {
    client: s3::Client,
}

impl S3BlobStore {
    /// Static credentials are used only when both keys are configured; otherwise
    /// the default AWS provider chain applies.
    pub async fn connect(s3_config: &S3StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
        if let Some(endpoint) = &s3_config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(region) = &s3_config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(key_id), Some(secret)) =
            (&s3_config.access_key_id, &s3_config.secret_access_key)
        {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                key_id, secret, None, // session_token
                None, // expiry
                "Static",
            ));
        }
        let sdk_config = loader.load().await;
        S3BlobStore {
            client: s3::Client::new(&sdk_config),
        }
    }
}

fn transfer_error(action: &str, bucket: &str, key: &str, err: impl std::error::Error) -> AppError {
    AppError::BlobTransfer(format!(
        "{} s3://{}/{} failed: {}",
        action,
        bucket,
        key,
        DisplayErrorContext(err)
    ))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| transfer_error("Reading upload body for", bucket, key, e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_error("Upload to", bucket, key, e))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| transfer_error("Listing", bucket, prefix, e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }

    async fn get_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        let mut object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| transfer_error("Download of", bucket, key, e))?;

        let mut output_file = File::create(local_path).await?;
        let mut total_bytes_downloaded = 0;
        while let Some(bytes_chunk) = object
            .body
            .try_next()
            .await
            .map_err(|e| transfer_error("Reading body of", bucket, key, e))?
        {
            output_file.write_all(&bytes_chunk).await?;
            total_bytes_downloaded += bytes_chunk.len();
        }
        output_file.flush().await?;

        debug!(bucket, key, bytes = total_bytes_downloaded, "Object downloaded");
        Ok(())
    }
}
