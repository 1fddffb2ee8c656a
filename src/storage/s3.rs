//! S3-compatible destination (AWS S3, MinIO, R2, Spaces).
//!
//! Uploads are sequential: small objects in one `PutObject`, larger ones as
//! a multipart upload with the part size bounded so the part count never
//! exceeds the backend's ceiling.

use crate::config::S3Settings;
use crate::error::{Error, Result};
use crate::storage::Storage;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// S3 limits multipart uploads to 10k parts.
const MAX_PARTS: u64 = 10_000;

/// Never go below 8 MiB per part (the API minimum is 5 MiB).
const MIN_PART_SIZE: u64 = 8 * 1024 * 1024;

pub struct S3Storage {
    client: Client,
    settings: S3Settings,
}

impl S3Storage {
    pub async fn new(settings: S3Settings) -> Result<Self> {
        if settings.bucket.is_empty() {
            return Err(Error::Config("s3: bucket is required".into()));
        }
        if settings.access_key_id.is_empty() || settings.secret_access_key.is_empty() {
            return Err(Error::Config("s3: credentials are required".into()));
        }

        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_attempt_timeout(settings.timeout)
            .build();
        let retries =
            aws_config::retry::RetryConfig::standard().with_max_attempts(settings.max_retries);

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .timeout_config(timeouts)
            .retry_config(retries);
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).credentials_provider(
            aws_sdk_s3::config::Credentials::new(
                &settings.access_key_id,
                &settings.secret_access_key,
                None,
                None,
                "stashd",
            ),
        );
        // Path-style addressing for MinIO and friends.
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Ok(Self { client, settings })
    }

    fn remote_key(&self, key: &str) -> String {
        let prefix = self.settings.path.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }

    fn storage_class(&self) -> Option<StorageClass> {
        self.settings
            .storage_class
            .as_deref()
            .map(StorageClass::from)
    }

    async fn put_whole(&self, local: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| Error::Transport(format!("s3: read {}: {e}", local.display())))?;
        self.client
            .put_object()
            .bucket(&self.settings.bucket)
            .key(key)
            .body(body)
            .set_storage_class(self.storage_class())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("s3: put {key}: {e}")))?;
        Ok(())
    }

    async fn put_multipart(&self, local: &Path, key: &str, size: u64, part_size: u64) -> Result<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.settings.bucket)
            .key(key)
            .set_storage_class(self.storage_class())
            .send()
            .await
            .map_err(|e| Error::Transport(format!("s3: create multipart {key}: {e}")))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| Error::Transport(format!("s3: no upload id for {key}")))?
            .to_string();

        match self
            .upload_parts(local, key, size, part_size, &upload_id)
            .await
        {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.settings.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| Error::Transport(format!("s3: complete multipart {key}: {e}")))?;
                Ok(())
            }
            Err(e) => {
                // Leave nothing half-assembled on the remote side.
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.settings.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        local: &Path,
        key: &str,
        size: u64,
        part_size: u64,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(local).await?;
        let mut parts = Vec::new();
        let mut sent = 0u64;
        let mut part_number = 1i32;

        while sent < size {
            let len = part_size.min(size - sent) as usize;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).await?;

            debug!(key, part_number, len, "uploading part");
            let output = self
                .client
                .upload_part()
                .bucket(&self.settings.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| Error::Transport(format!("s3: part {part_number} of {key}: {e}")))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            sent += len as u64;
            part_number += 1;
        }

        Ok(parts)
    }
}

/// Part size bounded so the part count stays under [`MAX_PARTS`].
fn part_size_for(total: u64) -> u64 {
    MIN_PART_SIZE.max(total.div_ceil(MAX_PARTS))
}

#[async_trait]
impl Storage for S3Storage {
    async fn open(&mut self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.settings.bucket)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("s3: bucket {}: {e}", self.settings.bucket)))?;
        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let size = tokio::fs::metadata(local).await?.len();
        let remote = self.remote_key(key);
        let part_size = part_size_for(size);

        info!(key = %remote, size, "S3 uploading");
        if size <= part_size {
            self.put_whole(local, &remote).await
        } else {
            self.put_multipart(local, &remote, size, part_size).await
        }
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let remote = self.remote_key(key);
        self.client
            .delete_object()
            .bucket(&self.settings.bucket)
            .key(&remote)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("s3: delete {remote}: {e}")))?;
        Ok(())
    }

    async fn close(&mut self) {}

    async fn list_keys(&mut self) -> Result<Option<Vec<String>>> {
        let prefix = {
            let p = self.settings.path.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        };

        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.settings.bucket)
                .prefix(&prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let page = request
                .send()
                .await
                .map_err(|e| Error::Transport(format!("s3: list: {e}")))?;

            for object in page.contents() {
                if let Some(stripped) = object.key().and_then(|k| listing_key(&prefix, k)) {
                    keys.push(stripped);
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(Some(keys))
    }
}

/// Strips exactly one copy of the listing prefix; keys outside the prefix
/// are skipped rather than returned mangled.
fn listing_key(prefix: &str, key: &str) -> Option<String> {
    key.strip_prefix(prefix).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_prefix_is_stripped_exactly_once() {
        assert_eq!(
            listing_key("backups/", "backups/backups/a.tar").as_deref(),
            Some("backups/a.tar")
        );
        assert_eq!(
            listing_key("backups/", "backups/a.tar").as_deref(),
            Some("a.tar")
        );
        assert_eq!(listing_key("backups/", "other/a.tar"), None);
        assert_eq!(listing_key("", "a.tar").as_deref(), Some("a.tar"));
    }

    #[test]
    fn part_size_stays_under_part_ceiling() {
        assert_eq!(part_size_for(1), MIN_PART_SIZE);
        assert_eq!(part_size_for(MIN_PART_SIZE * MAX_PARTS), MIN_PART_SIZE);

        let huge = 5 * 1024 * 1024 * 1024 * 1024u64; // 5 TiB
        let part = part_size_for(huge);
        assert!(huge.div_ceil(part) <= MAX_PARTS);
    }
}
