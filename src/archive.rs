//! Archive stage: packs the configured include paths into a tar container
//! inside the run's dump directory.

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::exec;
use std::path::Path;
use tracing::info;

/// Produce `<dump>/archive.tar` from the include paths.
///
/// Zero includes is a hard configuration error; the run aborts before any
/// external command is invoked.
pub async fn run(archive: &ArchiveConfig, dump_path: &Path) -> Result<()> {
    if archive.includes.is_empty() {
        return Err(Error::Config("archive.includes have no config".into()));
    }

    tokio::fs::create_dir_all(dump_path).await?;

    let tar_path = dump_path.join("archive.tar");
    info!(
        includes = archive.includes.len(),
        excludes = archive.excludes.len(),
        "Archiving"
    );

    let mut args: Vec<String> = vec!["-cPf".into(), tar_path.display().to_string()];
    for exclude in &archive.excludes {
        args.push(format!("--exclude={exclude}"));
    }
    args.extend(archive.includes.iter().cloned());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    exec::run("tar", &arg_refs).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_includes_is_config_error() {
        let archive = ArchiveConfig {
            includes: vec![],
            excludes: vec![],
        };
        let dir = tempfile::tempdir().unwrap();
        let err = run(&archive, dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn packs_include_paths() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();

        let dump = tempfile::tempdir().unwrap();
        let archive = ArchiveConfig {
            includes: vec![src.path().display().to_string()],
            excludes: vec![],
        };

        run(&archive, dump.path()).await.unwrap();
        assert!(dump.path().join("archive.tar").exists());
    }
}
