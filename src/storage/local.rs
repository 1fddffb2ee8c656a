//! Local filesystem destination: upload is a copy, delete removes the file
//! (or chunk directory). No network failure modes.

use crate::config::LocalSettings;
use crate::error::Result;
use crate::storage::Storage;
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

pub struct LocalStorage {
    settings: LocalSettings,
}

impl LocalStorage {
    pub fn new(settings: LocalSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn open(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.settings.path).await?;
        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let target = self.settings.path.join(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(target = %target.display(), "copy");
        tokio::fs::copy(local, &target).await?;
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let target = self.settings.path.join(key);
        let meta = match tokio::fs::metadata(&target).await {
            Ok(meta) => meta,
            // Already gone, nothing to retry.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {}

    async fn list_keys(&mut self) -> Result<Option<Vec<String>>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.settings.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                let mut chunks = tokio::fs::read_dir(entry.path()).await?;
                while let Some(chunk) = chunks.next_entry().await? {
                    keys.push(format!("{name}/{}", chunk.file_name().to_string_lossy()));
                }
            } else {
                keys.push(name);
            }
        }
        Ok(Some(keys))
    }
}
