//! FTP destination over a blocking `suppaftp` session, driven through
//! `spawn_blocking` like the SCP backend.

use crate::config::FtpSettings;
use crate::error::{Error, Result};
use crate::storage::Storage;
use async_trait::async_trait;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use suppaftp::{FtpError, FtpStream, Status};
use tracing::info;

pub struct FtpStorage {
    settings: FtpSettings,
    stream: Option<Arc<Mutex<FtpStream>>>,
}

impl FtpStorage {
    pub fn new(settings: FtpSettings) -> Self {
        Self {
            settings,
            stream: None,
        }
    }

    fn stream(&self) -> Result<Arc<Mutex<FtpStream>>> {
        self.stream
            .clone()
            .ok_or_else(|| Error::Transport("ftp: session not opened".into()))
    }

    fn remote_path(&self, key: &str) -> String {
        let base = self.settings.path.trim_end_matches('/');
        if base.is_empty() {
            key.to_string()
        } else {
            format!("{base}/{key}")
        }
    }
}

fn connect(settings: &FtpSettings) -> Result<FtpStream> {
    if settings.host.is_empty() {
        return Err(Error::Config("ftp: host is required".into()));
    }

    let addr = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|e| Error::Transport(format!("ftp: resolve {}: {e}", settings.host)))?
        .next()
        .ok_or_else(|| Error::Transport(format!("ftp: no address for {}", settings.host)))?;

    let mut stream = FtpStream::connect_timeout(addr, settings.timeout)
        .map_err(|e| Error::Transport(format!("ftp: connect {addr}: {e}")))?;
    stream
        .login(&settings.username, &settings.password)
        .map_err(|e| Error::Transport(format!("ftp: login: {e}")))?;

    if !settings.path.is_empty() {
        // May already exist.
        let _ = stream.mkdir(&settings.path);
    }

    Ok(stream)
}

fn lock(stream: &Arc<Mutex<FtpStream>>) -> Result<std::sync::MutexGuard<'_, FtpStream>> {
    stream
        .lock()
        .map_err(|_| Error::Transport("ftp: session lock poisoned".into()))
}

fn is_missing(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(resp) if resp.status == Status::FileUnavailable)
}

#[async_trait]
impl Storage for FtpStorage {
    async fn open(&mut self) -> Result<()> {
        let settings = self.settings.clone();
        let stream = tokio::task::spawn_blocking(move || connect(&settings))
            .await
            .map_err(|e| Error::Transport(format!("ftp: join: {e}")))??;
        self.stream = Some(Arc::new(Mutex::new(stream)));
        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let stream = self.stream()?;
        let remote = self.remote_path(key);
        let local: PathBuf = local.to_path_buf();

        info!(remote = %remote, "ftp uploading");
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&stream)?;
            if let Some((dir, _)) = remote.rsplit_once('/') {
                let _ = guard.mkdir(dir);
            }
            let mut file = std::fs::File::open(&local)?;
            guard
                .put_file(&remote, &mut file)
                .map_err(|e| Error::Transport(format!("ftp: put {remote}: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Transport(format!("ftp: join: {e}")))?
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let stream = self.stream()?;
        let remote = self.remote_path(key);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&stream)?;
            match guard.rm(&remote) {
                Ok(()) => Ok(()),
                Err(e) if is_missing(&e) => {
                    // Chunk grouping keys are directories; a vanished key is
                    // also fine, the next run has nothing left to retry.
                    match guard.rmdir(&remote) {
                        Ok(()) => Ok(()),
                        Err(e) if is_missing(&e) => Ok(()),
                        Err(e) => Err(Error::Transport(format!("ftp: rmdir {remote}: {e}"))),
                    }
                }
                Err(e) => Err(Error::Transport(format!("ftp: rm {remote}: {e}"))),
            }
        })
        .await
        .map_err(|e| Error::Transport(format!("ftp: join: {e}")))?
    }

    async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = tokio::task::spawn_blocking(move || {
                if let Ok(mut guard) = stream.lock() {
                    let _ = guard.quit();
                }
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suppaftp::types::Response;

    #[test]
    fn only_file_unavailable_counts_as_missing() {
        let gone = FtpError::UnexpectedResponse(Response::new(
            Status::FileUnavailable,
            "550 File unavailable".into(),
        ));
        assert!(is_missing(&gone));

        let denied =
            FtpError::UnexpectedResponse(Response::new(Status::NotLoggedIn, "530 Not logged in".into()));
        assert!(!is_missing(&denied));
    }
}
