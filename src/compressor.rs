//! Compression stage.
//!
//! Always runs, even with no compression configured: the pass-through "tar"
//! mode guarantees every later stage sees one single-file artifact whose
//! base name carries the run timestamp the retention cycler orders by.

use crate::config::CompressConfig;
use crate::error::{Error, Result};
use crate::exec;
use std::path::{Path, PathBuf};
use tracing::info;

/// Timestamp format embedded in every artifact file key.
pub const FILE_KEY_FORMAT: &str = "%Y.%m.%d.%H.%M.%S";

fn tar_flag(kind: &str) -> Result<(&'static str, Option<&'static str>)> {
    // (extension, tar compression flag)
    match kind {
        "" | "tar" => Ok((".tar", None)),
        "gz" | "tgz" | "tar.gz" => Ok((".tar.gz", Some("-z"))),
        "bz2" | "tbz2" | "tar.bz2" => Ok((".tar.bz2", Some("-j"))),
        "xz" | "txz" | "tar.xz" => Ok((".tar.xz", Some("-J"))),
        "zst" | "tzst" | "tar.zst" => Ok((".tar.zst", Some("--zstd"))),
        other => Err(Error::Config(format!("unsupported compress type: {other}"))),
    }
}

/// Tar (and optionally compress) the dump directory into
/// `<temp>/<timestamp><ext>`, returning the artifact path.
pub async fn run(
    compress: Option<&CompressConfig>,
    temp_path: &Path,
    dump_path: &Path,
) -> Result<PathBuf> {
    let kind = compress.map(|c| c.kind.as_str()).unwrap_or("");
    let (ext, flag) = tar_flag(kind)?;

    tokio::fs::create_dir_all(dump_path).await?;

    let file_key = format!("{}{ext}", chrono::Local::now().format(FILE_KEY_FORMAT));
    let artifact = temp_path.join(&file_key);

    // Relative paths inside the archive: tar from the dump dir's parent.
    let base = dump_path
        .parent()
        .ok_or_else(|| Error::Config(format!("dump path has no parent: {}", dump_path.display())))?;
    let dir_name = dump_path
        .file_name()
        .ok_or_else(|| Error::Config(format!("dump path has no name: {}", dump_path.display())))?
        .to_string_lossy()
        .into_owned();

    info!(kind = if kind.is_empty() { "tar" } else { kind }, artifact = %artifact.display(), "Compressing");

    let mut args: Vec<String> = Vec::new();
    if let Some(flag) = flag {
        args.push(flag.to_string());
    }
    args.push("-cf".into());
    args.push(artifact.display().to_string());
    args.push("-C".into());
    args.push(base.display().to_string());
    args.push(dir_name);

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    exec::run("tar", &arg_refs).await?;

    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_compress_types() {
        assert_eq!(tar_flag("").unwrap(), (".tar", None));
        assert_eq!(tar_flag("gz").unwrap(), (".tar.gz", Some("-z")));
        assert_eq!(tar_flag("tar.xz").unwrap(), (".tar.xz", Some("-J")));
        assert!(matches!(tar_flag("rar"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn pass_through_produces_tar_with_timestamp_key() {
        let temp = tempfile::tempdir().unwrap();
        let dump = temp.path().join("mymodel");
        std::fs::create_dir_all(&dump).unwrap();
        std::fs::write(dump.join("data.txt"), b"payload").unwrap();

        let artifact = run(None, temp.path(), &dump).await.unwrap();
        assert!(artifact.exists());

        let name = artifact.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".tar"));
        let stamp = &name[..name.len() - ".tar".len()];
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, FILE_KEY_FORMAT).is_ok());
    }
}
