//! Splitter stage: converts the single-file artifact into a directory of
//! fixed-size numbered chunks via the external `split` binary.

use crate::config::SplitConfig;
use crate::error::{Error, Result};
use crate::exec;
use std::path::{Path, PathBuf};
use tracing::info;

/// Length of the `%Y.%m.%d.%H.%M.%S` prefix on every artifact base name.
const TIMESTAMP_LEN: usize = 19;

/// Split the artifact into `<temp>/<timestamp>/<basename>-NNN` chunks and
/// remove the pre-split file. Returns the chunk directory.
pub async fn run(split: &SplitConfig, artifact: &Path) -> Result<PathBuf> {
    if split.chunk_size.is_empty() {
        return Err(Error::Config("split.chunk_size is required".into()));
    }

    let base_name = artifact
        .file_name()
        .ok_or_else(|| Error::Config(format!("artifact has no name: {}", artifact.display())))?
        .to_string_lossy()
        .into_owned();
    if base_name.len() < TIMESTAMP_LEN {
        return Err(Error::Config(format!("unexpected artifact name: {base_name}")));
    }

    // Chunk directory named after the embedded timestamp, so the whole run
    // stays one retention unit.
    let dir = artifact
        .parent()
        .ok_or_else(|| Error::Config(format!("artifact has no parent: {}", artifact.display())))?
        .join(&base_name[..TIMESTAMP_LEN]);
    tokio::fs::create_dir_all(&dir).await?;

    info!(chunk_size = %split.chunk_size, dir = %dir.display(), "Splitting to chunks");

    let prefix = dir.join(format!("{base_name}-"));
    let suffix_length = split.suffix_length.to_string();
    exec::run(
        "split",
        &[
            "-b",
            &split.chunk_size,
            "-a",
            &suffix_length,
            "--numeric-suffixes",
            &artifact.display().to_string(),
            &prefix.display().to_string(),
        ],
    )
    .await?;

    tokio::fs::remove_file(artifact).await?;

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_into_numbered_chunks_and_removes_source() {
        let temp = tempfile::tempdir().unwrap();
        let artifact = temp.path().join("2026.08.30.01.02.03.tar");
        std::fs::write(&artifact, vec![0u8; 3000]).unwrap();

        let split = SplitConfig {
            chunk_size: "1k".into(),
            suffix_length: 3,
        };
        let dir = run(&split, &artifact).await.unwrap();

        assert!(!artifact.exists());
        assert_eq!(dir.file_name().unwrap(), "2026.08.30.01.02.03");

        let mut chunks: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        chunks.sort();
        assert_eq!(
            chunks,
            vec![
                "2026.08.30.01.02.03.tar-000",
                "2026.08.30.01.02.03.tar-001",
                "2026.08.30.01.02.03.tar-002",
            ]
        );
    }
}
