//! Pipeline orchestrator: drives one backup run for one model.
//!
//! Stages run sequentially, each gated on the previous one's success.
//! Cleanup of the working tree and the after-script run exactly once on
//! every exit path, and the outcome is reported to the configured
//! notifiers after cleanup.

use crate::config::ModelConfig;
use crate::error::Result;
use crate::storage::Artifact;
use crate::{archive, compressor, encryptor, exec, notifier, splitter, storage};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct Model {
    pub name: String,
    pub config: ModelConfig,
    /// Per-run working tree, exclusively owned by this run.
    temp_path: PathBuf,
    /// Where stage output is assembled before compression.
    dump_path: PathBuf,
    state_dir: PathBuf,
}

impl Model {
    pub fn new(name: &str, config: ModelConfig, temp_dir: &Path, state_dir: &Path) -> Self {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let temp_path = temp_dir.join(nanos.to_string());
        let dump_path = temp_path.join(name);
        Self {
            name: name.to_string(),
            config,
            temp_path,
            dump_path,
            state_dir: state_dir.to_path_buf(),
        }
    }

    /// Run the full pipeline. Cleanup and notification happen regardless of
    /// the stage outcome; the stage error (if any) is returned to the caller.
    pub async fn perform(&self) -> Result<()> {
        info!(model = %self.name, workdir = %self.temp_path.display(), "Performing");

        let result = self.run_stages().await;

        self.cleanup().await;

        match &result {
            Ok(()) => notifier::success(&self.name, &self.config).await,
            Err(e) => notifier::failure(&self.name, &self.config, &e.to_string()).await,
        }

        result
    }

    async fn run_stages(&self) -> Result<()> {
        if let Some(script) = &self.config.before_script {
            // A failing before-script is reported but does not stop the run.
            if let Err(e) = exec::run_shell(script).await {
                warn!(model = %self.name, error = %e, "before_script failed");
            }
        }

        tokio::fs::create_dir_all(&self.dump_path).await?;

        if let Some(archive) = &self.config.archive {
            archive::run(archive, &self.dump_path).await?;
        }

        // Always runs; pass-through tar when no compression is configured,
        // so every later stage sees one single-file artifact.
        let mut artifact_path =
            compressor::run(self.config.compress.as_ref(), &self.temp_path, &self.dump_path)
                .await?;

        if let Some(encrypt) = &self.config.encrypt {
            artifact_path = encryptor::run(encrypt, &artifact_path).await?;
        }

        if let Some(split) = &self.config.split {
            artifact_path = splitter::run(split, &artifact_path).await?;
        }

        let artifact = Artifact::from_path(&artifact_path).await?;

        // Destinations are independent, but a failure short-circuits the
        // remaining ones and becomes the run's error.
        for (destination_name, destination) in &self.config.storages {
            storage::run(
                &self.name,
                destination_name,
                destination,
                &self.state_dir,
                &artifact,
            )
            .await?;
        }

        Ok(())
    }

    async fn cleanup(&self) {
        info!(model = %self.name, temp = %self.temp_path.display(), "Cleanup temp");
        if let Err(e) = tokio::fs::remove_dir_all(&self.temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(model = %self.name, error = %e, "Cleanup temp failed");
            }
        }

        if let Some(script) = &self.config.after_script {
            if let Err(e) = exec::run_shell(script).await {
                warn!(model = %self.name, error = %e, "after_script failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::Error;

    fn model_from_toml(name: &str, toml_str: &str, temp: &Path, state: &Path) -> Model {
        let config: Config = toml::from_str(toml_str).unwrap();
        Model::new(name, config.models[name].clone(), temp, state)
    }

    #[tokio::test]
    async fn zero_includes_aborts_before_any_stage_and_cleans_up() {
        let temp = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let model = model_from_toml(
            "m",
            r#"
                [models.m.archive]
                includes = []
            "#,
            temp.path(),
            state.path(),
        );

        let err = model.perform().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // Working tree is gone and nothing was compressed or stored.
        assert!(!model.temp_path.exists());
        assert!(std::fs::read_dir(state.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn successful_run_stores_artifact_and_removes_workdir() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("data.txt"), b"payload").unwrap();
        let dest = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();

        let toml_str = format!(
            r#"
                [models.nightly.archive]
                includes = ["{}"]

                [models.nightly.storages.disk]
                type = "local"
                path = "{}"
            "#,
            src.path().display(),
            dest.path().display(),
        );
        let model = model_from_toml("nightly", &toml_str, temp.path(), state.path());

        model.perform().await.unwrap();

        assert!(!model.temp_path.exists());

        let stored: Vec<_> = std::fs::read_dir(dest.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].ends_with(".tar"));

        // Retention state was persisted for the next run.
        assert!(state.path().join("nightly/disk.json").exists());
    }

    #[tokio::test]
    async fn keep_two_retains_the_two_most_recent_runs() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("data.txt"), b"payload").unwrap();
        let dest = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();

        let toml_str = format!(
            r#"
                [models.nightly.archive]
                includes = ["{}"]

                [models.nightly.storages.disk]
                type = "local"
                path = "{}"
                keep = 2
            "#,
            src.path().display(),
            dest.path().display(),
        );

        let temps: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
        for temp in &temps {
            let model = model_from_toml("nightly", &toml_str, temp.path(), state.path());
            model.perform().await.unwrap();
            // File keys carry second-resolution timestamps; keep them distinct.
            tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        }

        let mut stored: Vec<_> = std::fs::read_dir(dest.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        stored.sort();
        assert_eq!(stored.len(), 2, "oldest artifact should have been pruned");

        // The survivors are the two most recent by embedded timestamp.
        let packages: Vec<serde_json::Value> = serde_json::from_str(
            &std::fs::read_to_string(state.path().join("nightly/disk.json")).unwrap(),
        )
        .unwrap();
        let tracked: Vec<_> = packages
            .iter()
            .map(|p| p["file_key"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(tracked, stored);
    }

    #[tokio::test]
    async fn before_script_failure_is_not_fatal() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("data.txt"), b"payload").unwrap();
        let dest = tempfile::tempdir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();

        let toml_str = format!(
            r#"
                [models.m]
                before_script = "exit 1"

                [models.m.archive]
                includes = ["{}"]

                [models.m.storages.disk]
                type = "local"
                path = "{}"
            "#,
            src.path().display(),
            dest.path().display(),
        );
        let model = model_from_toml("m", &toml_str, temp.path(), state.path());
        model.perform().await.unwrap();
    }
}
