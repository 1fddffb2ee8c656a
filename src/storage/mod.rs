//! Multi-destination storage engine.
//!
//! Backends differ only in how one artifact moves over the wire; upload
//! fan-out for chunked artifacts and the retention pass live here.

pub mod cycler;
pub mod ftp;
pub mod local;
pub mod s3;
pub mod scp;
pub mod webdav;

use crate::config::{BackendConfig, DestinationConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// The produced backup object for one run: a single file, or a directory of
/// numbered chunk files sharing the run's base name.
#[derive(Debug, Clone)]
pub enum Artifact {
    Single {
        path: PathBuf,
        file_key: String,
    },
    Chunked {
        dir: PathBuf,
        file_key: String,
        /// Chunk file paths, sorted by name.
        chunks: Vec<PathBuf>,
    },
}

impl Artifact {
    /// Classify the pipeline's final path as a single file or a chunk
    /// directory.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let file_key = path
            .file_name()
            .ok_or_else(|| Error::Config(format!("artifact has no name: {}", path.display())))?
            .to_string_lossy()
            .into_owned();

        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_dir() {
            return Ok(Artifact::Single {
                path: path.to_path_buf(),
                file_key,
            });
        }

        let mut chunks = Vec::new();
        let mut entries = tokio::fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                chunks.push(entry.path());
            }
        }
        chunks.sort();

        Ok(Artifact::Chunked {
            dir: path.to_path_buf(),
            file_key,
            chunks,
        })
    }

    pub fn file_key(&self) -> &str {
        match self {
            Artifact::Single { file_key, .. } | Artifact::Chunked { file_key, .. } => file_key,
        }
    }

    /// Remote keys for every chunk, `<fileKey>/<chunkName>`. Empty for a
    /// single-file artifact.
    pub fn chunk_keys(&self) -> Vec<String> {
        match self {
            Artifact::Single { .. } => Vec::new(),
            Artifact::Chunked {
                file_key, chunks, ..
            } => chunks
                .iter()
                .filter_map(|c| c.file_name())
                .map(|name| format!("{file_key}/{}", name.to_string_lossy()))
                .collect(),
        }
    }
}

/// One opened destination session. `delete` must tolerate a missing object,
/// since a failed deletion is retried on a later run.
#[async_trait]
pub trait Storage: Send {
    async fn open(&mut self) -> Result<()>;

    async fn upload_file(&mut self, local: &Path, key: &str) -> Result<()>;

    async fn delete(&mut self, key: &str) -> Result<()>;

    async fn close(&mut self);

    /// Enumerate keys already present at the destination, used to seed
    /// retention state when no persisted package list exists. `None` means
    /// the backend has no listing support and seeding is skipped.
    async fn list_keys(&mut self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Construct a backend from its settings. Matched exhaustively; an unknown
/// type never gets past config deserialization.
pub async fn build(backend: &BackendConfig) -> Result<Box<dyn Storage>> {
    Ok(match backend {
        BackendConfig::Local(settings) => Box::new(local::LocalStorage::new(settings.clone())),
        BackendConfig::S3(settings) => Box::new(s3::S3Storage::new(settings.clone()).await?),
        BackendConfig::Scp(settings) => Box::new(scp::ScpStorage::new(settings.clone())),
        BackendConfig::Ftp(settings) => Box::new(ftp::FtpStorage::new(settings.clone())),
        BackendConfig::Webdav(settings) => Box::new(webdav::WebdavStorage::new(settings.clone())?),
    })
}

/// Upload the artifact to one destination and run its retention pass.
///
/// The session is closed on every exit path. The local artifact is never
/// deleted here; the working tree belongs to the pipeline's cleanup.
pub async fn run(
    model_name: &str,
    destination_name: &str,
    destination: &DestinationConfig,
    state_dir: &Path,
    artifact: &Artifact,
) -> Result<()> {
    info!(
        model = %model_name,
        destination = %destination_name,
        backend = destination.backend.kind(),
        key = %artifact.file_key(),
        "Storing"
    );

    let mut backend = build(&destination.backend).await?;
    backend.open().await?;
    let result = store(
        model_name,
        destination_name,
        destination,
        state_dir,
        artifact,
        backend.as_mut(),
    )
    .await;
    backend.close().await;
    result
}

async fn store(
    model_name: &str,
    destination_name: &str,
    destination: &DestinationConfig,
    state_dir: &Path,
    artifact: &Artifact,
    backend: &mut dyn Storage,
) -> Result<()> {
    match artifact {
        Artifact::Single { path, file_key } => {
            backend.upload_file(path, file_key).await?;
        }
        Artifact::Chunked {
            file_key, chunks, ..
        } => {
            // Any chunk failing aborts the whole destination upload; no
            // retention record is created for a partial transfer.
            for chunk in chunks {
                let name = chunk
                    .file_name()
                    .ok_or_else(|| Error::Config(format!("chunk has no name: {}", chunk.display())))?
                    .to_string_lossy();
                backend.upload_file(chunk, &format!("{file_key}/{name}")).await?;
            }
        }
    }

    let mut cycler = cycler::Cycler::load(state_dir, model_name, destination_name)?;
    // First contact with this destination (or lost state): rebuild the
    // package list from what is actually there, so retention does not
    // forget uploads made before a restart.
    if cycler.is_fresh() {
        if let Some(keys) = backend.list_keys().await? {
            // The listing already contains this run's upload; it is recorded
            // separately below.
            let current = artifact.file_key();
            let chunk_prefix = format!("{current}/");
            cycler.seed(
                keys.into_iter()
                    .filter(|k| k != current && !k.starts_with(&chunk_prefix))
                    .collect(),
            );
        }
    }
    cycler
        .run(
            artifact.file_key(),
            artifact.chunk_keys(),
            destination.keep,
            backend,
        )
        .await
}
