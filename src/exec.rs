//! External process invocation shared by the stage collaborators.

use crate::error::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Run a binary with args, failing with captured stderr on non-zero exit.
pub async fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!(program, ?args, "exec");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Command(format!("{program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Command(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a shell snippet (before/after script hooks).
pub async fn run_shell(script: &str) -> Result<String> {
    run("sh", &["-c", script]).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = run("echo", &["hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_command_error() {
        let err = run_shell("exit 3").await.unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }
}
