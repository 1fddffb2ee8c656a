//! Retention cycler: per (model, destination) list of uploaded packages,
//! pruned to the configured `keep` count.
//!
//! State survives restarts as a JSON sidecar under the state directory
//! (`<state>/<model>/<destination>.json`), loaded at the start of a
//! destination's upload step and persisted after pruning.

use crate::compressor::FILE_KEY_FORMAT;
use crate::error::Result;
use crate::storage::Storage;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One retained upload. `created_at` comes from the timestamp embedded in
/// the file key, so retention ordering is deterministic regardless of when
/// pruning runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub file_key: String,

    #[serde(default)]
    pub chunk_keys: Vec<String>,

    pub created_at: DateTime<Utc>,
}

/// Parse the `%Y.%m.%d.%H.%M.%S` prefix of a file key.
pub fn parse_created_at(file_key: &str) -> Option<DateTime<Utc>> {
    let stamp = file_key.get(..19)?;
    let naive = NaiveDateTime::parse_from_str(stamp, FILE_KEY_FORMAT).ok()?;
    chrono::Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug)]
pub struct Cycler {
    path: PathBuf,
    packages: Vec<Package>,
    fresh: bool,
}

impl Cycler {
    /// Load the destination's package list, or start empty if none was
    /// persisted yet.
    pub fn load(state_dir: &Path, model: &str, destination: &str) -> Result<Self> {
        let path = state_dir.join(model).join(format!("{destination}.json"));
        let (packages, fresh) = match std::fs::read_to_string(&path) {
            Ok(content) => (serde_json::from_str(&content)?, false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), true),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            packages,
            fresh,
        })
    }

    /// True when no sidecar existed for this destination yet.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Rebuild the package list from a destination's raw key listing.
    ///
    /// Keys shaped `<dir>/<chunk>` are grouped into one package per `<dir>`;
    /// keys whose name carries no parseable timestamp are ignored (they are
    /// not ours to rotate).
    pub fn seed(&mut self, keys: Vec<String>) {
        let mut packages: Vec<Package> = Vec::new();
        for key in keys {
            match key.split_once('/') {
                Some((dir, _)) => {
                    if parse_created_at(dir).is_none() {
                        continue;
                    }
                    match packages.iter_mut().find(|p| p.file_key == dir) {
                        Some(package) => package.chunk_keys.push(key.clone()),
                        None => packages.push(Package {
                            file_key: dir.to_string(),
                            chunk_keys: vec![key.clone()],
                            created_at: parse_created_at(dir).unwrap_or_else(Utc::now),
                        }),
                    }
                }
                None => {
                    if let Some(created_at) = parse_created_at(&key) {
                        packages.push(Package {
                            file_key: key,
                            chunk_keys: Vec::new(),
                            created_at,
                        });
                    }
                }
            }
        }
        packages.sort_by_key(|p| p.created_at);
        for package in &mut packages {
            package.chunk_keys.sort();
        }
        self.packages = packages;
        self.fresh = false;
    }

    /// Record a successful upload and prune everything beyond `keep`.
    ///
    /// `keep == 0` disables retention: nothing is ever deleted. A deletion
    /// failure keeps its package tracked for retry on a later run.
    pub async fn run(
        &mut self,
        file_key: &str,
        chunk_keys: Vec<String>,
        keep: usize,
        storage: &mut dyn Storage,
    ) -> Result<()> {
        self.add(file_key, chunk_keys);

        if keep > 0 {
            while let Some(package) = self.shift_by_keep(keep) {
                match delete_package(storage, &package).await {
                    Ok(()) => {
                        info!(key = %package.file_key, "Removed old package");
                    }
                    Err(e) => {
                        warn!(key = %package.file_key, error = %e, "Failed to remove old package, keeping it tracked");
                        self.packages.insert(0, package);
                        break;
                    }
                }
            }
        }

        self.persist()
    }

    pub fn add(&mut self, file_key: &str, chunk_keys: Vec<String>) {
        self.packages.push(Package {
            file_key: file_key.to_string(),
            chunk_keys,
            created_at: parse_created_at(file_key).unwrap_or_else(Utc::now),
        });
    }

    /// Pop the oldest package while more than `keep` are tracked. Packages
    /// are append-ordered, so the front is the oldest.
    fn shift_by_keep(&mut self, keep: usize) -> Option<Package> {
        if self.packages.len() <= keep {
            return None;
        }
        Some(self.packages.remove(0))
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.packages)?)?;
        Ok(())
    }

    #[cfg(test)]
    fn file_keys(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.file_key.as_str()).collect()
    }
}

async fn delete_package(storage: &mut dyn Storage, package: &Package) -> Result<()> {
    // Chunks first, then the grouping key itself, so one run's chunks are
    // always removed together.
    for chunk_key in &package.chunk_keys {
        storage.delete(chunk_key).await?;
    }
    storage.delete(&package.file_key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;

    struct FakeStorage {
        deleted: Vec<String>,
        fail_on: Option<String>,
    }

    impl FakeStorage {
        fn new() -> Self {
            Self {
                deleted: Vec::new(),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl Storage for FakeStorage {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn upload_file(&mut self, _local: &Path, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn delete(&mut self, key: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some(key) {
                return Err(Error::Transport(format!("cannot delete {key}")));
            }
            self.deleted.push(key.to_string());
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn cycler() -> (tempfile::TempDir, Cycler) {
        let state = tempfile::tempdir().unwrap();
        let cycler = Cycler::load(state.path(), "nightly", "disk").unwrap();
        (state, cycler)
    }

    #[test]
    fn add_appends_packages() {
        let (_state, mut cycler) = cycler();
        cycler.add("foo", vec![]);
        cycler.add("bar", vec![]);
        assert_eq!(cycler.packages.len(), 2);
    }

    #[test]
    fn shift_by_keep_pops_oldest_first() {
        let (_state, mut cycler) = cycler();
        for key in ["p1", "p2", "p3", "p4", "p5", "p6"] {
            cycler.add(key, vec![]);
        }

        assert_eq!(cycler.shift_by_keep(2).unwrap().file_key, "p1");
        assert_eq!(cycler.shift_by_keep(2).unwrap().file_key, "p2");
        assert_eq!(cycler.packages.len(), 4);
        assert!(cycler.shift_by_keep(4).is_none());
    }

    #[test]
    fn seed_groups_chunks_and_orders_by_embedded_timestamp() {
        let (_state, mut cycler) = cycler();
        assert!(cycler.is_fresh());

        cycler.seed(vec![
            "2026.02.01.00.00.00.tar".into(),
            "2026.01.01.00.00.00/2026.01.01.00.00.00.tar-001".into(),
            "2026.01.01.00.00.00/2026.01.01.00.00.00.tar-000".into(),
            "unrelated-file.txt".into(),
        ]);

        assert!(!cycler.is_fresh());
        assert_eq!(
            cycler.file_keys(),
            vec!["2026.01.01.00.00.00", "2026.02.01.00.00.00.tar"]
        );
        assert_eq!(
            cycler.packages[0].chunk_keys,
            vec![
                "2026.01.01.00.00.00/2026.01.01.00.00.00.tar-000",
                "2026.01.01.00.00.00/2026.01.01.00.00.00.tar-001",
            ]
        );
    }

    #[test]
    fn created_at_comes_from_file_key() {
        let at = parse_created_at("2026.08.30.01.02.03.tar.gz").unwrap();
        let local = at.with_timezone(&chrono::Local);
        assert_eq!(local.format("%Y.%m.%d.%H.%M.%S").to_string(), "2026.08.30.01.02.03");

        assert!(parse_created_at("not-a-timestamp.tar").is_none());
    }

    #[tokio::test]
    async fn keeps_last_n_packages() {
        let (state, mut cycler) = cycler();
        let mut storage = FakeStorage::new();

        for key in ["a.tar", "b.tar", "c.tar"] {
            cycler.run(key, vec![], 2, &mut storage).await.unwrap();
        }

        assert_eq!(cycler.file_keys(), vec!["b.tar", "c.tar"]);
        assert_eq!(storage.deleted, vec!["a.tar"]);

        // Survives a restart.
        let reloaded = Cycler::load(state.path(), "nightly", "disk").unwrap();
        assert_eq!(reloaded.file_keys(), vec!["b.tar", "c.tar"]);
    }

    #[tokio::test]
    async fn keep_zero_never_deletes() {
        let (_state, mut cycler) = cycler();
        let mut storage = FakeStorage::new();

        for key in ["a.tar", "b.tar", "c.tar", "d.tar"] {
            cycler.run(key, vec![], 0, &mut storage).await.unwrap();
        }

        assert_eq!(cycler.packages.len(), 4);
        assert!(storage.deleted.is_empty());
    }

    #[tokio::test]
    async fn chunked_package_is_deleted_as_one_unit() {
        let (_state, mut cycler) = cycler();
        let mut storage = FakeStorage::new();

        cycler
            .run(
                "old",
                vec!["old/c-000".into(), "old/c-001".into()],
                1,
                &mut storage,
            )
            .await
            .unwrap();
        cycler.run("new", vec![], 1, &mut storage).await.unwrap();

        assert_eq!(storage.deleted, vec!["old/c-000", "old/c-001", "old"]);
        assert_eq!(cycler.file_keys(), vec!["new"]);
    }

    #[tokio::test]
    async fn failed_deletion_stays_tracked_and_retries_next_run() {
        let (_state, mut cycler) = cycler();
        let mut storage = FakeStorage::new();
        storage.fail_on = Some("a.tar".into());

        for key in ["a.tar", "b.tar", "c.tar"] {
            cycler.run(key, vec![], 2, &mut storage).await.unwrap();
        }
        // a.tar could not be deleted, so it is still the oldest tracked entry.
        assert_eq!(cycler.file_keys(), vec!["a.tar", "b.tar", "c.tar"]);

        storage.fail_on = None;
        cycler.run("d.tar", vec![], 2, &mut storage).await.unwrap();
        assert_eq!(cycler.file_keys(), vec!["c.tar", "d.tar"]);
        assert_eq!(storage.deleted, vec!["a.tar", "b.tar"]);
    }
}
