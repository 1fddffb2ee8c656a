//! Encryption stage: wraps an external `openssl enc` invocation.

use crate::config::EncryptConfig;
use crate::error::Result;
use crate::exec;
use std::path::{Path, PathBuf};
use tracing::info;

/// Encrypt the artifact, returning the new `.enc` path.
pub async fn run(encrypt: &EncryptConfig, artifact: &Path) -> Result<PathBuf> {
    let out_path = PathBuf::from(format!("{}.enc", artifact.display()));

    info!(artifact = %out_path.display(), "Encrypting");

    let pass = format!("pass:{}", encrypt.password);
    exec::run(
        "openssl",
        &[
            "enc",
            "-aes-256-cbc",
            "-pbkdf2",
            "-pass",
            &pass,
            "-in",
            &artifact.display().to_string(),
            "-out",
            &out_path.display().to_string(),
        ],
    )
    .await?;

    // The plaintext stays in the working tree; pipeline cleanup sweeps it.
    Ok(out_path)
}
