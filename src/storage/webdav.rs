//! WebDAV destination (Nextcloud, ownCloud and friends) via `reqwest_dav`.

use crate::config::WebdavSettings;
use crate::error::{Error, Result};
use crate::storage::Storage;
use async_trait::async_trait;
use reqwest_dav::{Auth, ClientBuilder};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::info;

pub struct WebdavStorage {
    client: reqwest_dav::Client,
    path_prefix: String,
}

impl WebdavStorage {
    pub fn new(settings: WebdavSettings) -> Result<Self> {
        if settings.url.is_empty() {
            return Err(Error::Config("webdav: url is required".into()));
        }
        if settings.username.is_empty() {
            return Err(Error::Config("webdav: username is required".into()));
        }

        let client = ClientBuilder::new()
            .set_host(settings.url.clone())
            .set_auth(Auth::Basic(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build()
            .map_err(|e| Error::Config(format!("webdav: client: {e}")))?;

        Ok(Self {
            client,
            path_prefix: settings.path.trim_matches('/').to_string(),
        })
    }

    fn remote_path(&self, key: &str) -> String {
        if self.path_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.path_prefix)
        }
    }

    /// MKCOL each path segment; an existing collection answers 405.
    async fn ensure_directory(&self, path: &str) -> Result<()> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            if let Err(e) = self.client.mkcol(&current).await {
                if !matches!(
                    e,
                    reqwest_dav::Error::Reqwest(ref re)
                        if re.status() == Some(reqwest::StatusCode::METHOD_NOT_ALLOWED)
                ) {
                    return Err(Error::Transport(format!("webdav: mkcol {current}: {e}")));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for WebdavStorage {
    async fn open(&mut self) -> Result<()> {
        if !self.path_prefix.is_empty() {
            let prefix = self.path_prefix.clone();
            self.ensure_directory(&prefix).await?;
        }
        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let remote = self.remote_path(key);
        if let Some((dir, _)) = remote.rsplit_once('/') {
            self.ensure_directory(dir).await?;
        }

        info!(remote = %remote, "webdav uploading");
        let file = tokio::fs::File::open(local).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        self.client
            .put(&remote, body)
            .await
            .map_err(|e| Error::Transport(format!("webdav: put {remote}: {e}")))?;
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let remote = self.remote_path(key);
        match self.client.delete(&remote).await {
            Ok(()) => Ok(()),
            // DELETE on a collection removes its members too; a missing key
            // has nothing left to retry.
            Err(reqwest_dav::Error::Reqwest(re))
                if re.status() == Some(reqwest::StatusCode::NOT_FOUND) =>
            {
                Ok(())
            }
            Err(e) => Err(Error::Transport(format!("webdav: delete {remote}: {e}"))),
        }
    }

    async fn close(&mut self) {}
}
