//! Configuration for the backup agent.
//!
//! Loaded from a TOML file. Each `[models.<name>]` table describes one
//! independently scheduled backup unit; destinations are a closed enum over
//! backend kinds so an unknown `type` is rejected at load time.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    /// Directory holding per-destination retention state files.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Parent directory for per-run working trees.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    // A derived Default would leave `level` empty and filter out everything.
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,

    #[serde(default)]
    pub archive: Option<ArchiveConfig>,

    #[serde(default)]
    pub compress: Option<CompressConfig>,

    #[serde(default)]
    pub encrypt: Option<EncryptConfig>,

    #[serde(default)]
    pub split: Option<SplitConfig>,

    /// Destination name → destination config. Destinations are independent.
    #[serde(default)]
    pub storages: HashMap<String, DestinationConfig>,

    #[serde(default)]
    pub notifiers: HashMap<String, NotifierConfig>,

    #[serde(default)]
    pub before_script: Option<String>,

    #[serde(default)]
    pub after_script: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Six-field cron expression (with seconds). Takes precedence over `every`.
    #[serde(default)]
    pub cron: Option<String>,

    /// Interval between runs, e.g. "1h", "30m".
    #[serde(default, with = "humantime_serde")]
    pub every: Option<Duration>,

    /// Fixed time of day, "HH:MM". Only meaningful together with `every`.
    #[serde(default)]
    pub at: Option<String>,
}

impl ScheduleConfig {
    pub fn describe(&self) -> String {
        if let Some(cron) = &self.cron {
            format!("cron {cron}")
        } else if let Some(every) = self.every {
            match &self.at {
                Some(at) => format!("every {every:?} at {at}"),
                None => format!("every {every:?}"),
            }
        } else {
            "unscheduled".to_string()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub includes: Vec<String>,

    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressConfig {
    /// tar (default), gz, bz2, xz or zst.
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncryptConfig {
    /// Only "openssl" is supported.
    #[serde(rename = "type", default = "default_encrypt_type")]
    pub kind: String,

    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplitConfig {
    /// Passed straight to `split -b`, e.g. "100m".
    pub chunk_size: String,

    #[serde(default = "default_suffix_length")]
    pub suffix_length: u32,
}

/// One storage target. `keep = 0` (or absent) disables retention.
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    #[serde(default)]
    pub keep: usize,

    #[serde(flatten)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Local(LocalSettings),
    S3(S3Settings),
    Scp(ScpSettings),
    Ftp(FtpSettings),
    Webdav(WebdavSettings),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Local(_) => "local",
            BackendConfig::S3(_) => "s3",
            BackendConfig::Scp(_) => "scp",
            BackendConfig::Ftp(_) => "ftp",
            BackendConfig::Webdav(_) => "webdav",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    pub bucket: String,

    #[serde(default = "default_s3_region")]
    pub region: String,

    #[serde(default)]
    pub path: String,

    pub access_key_id: String,
    pub secret_access_key: String,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub storage_class: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub force_path_style: bool,

    #[serde(default = "default_s3_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScpSettings {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub private_key: Option<PathBuf>,

    #[serde(default)]
    pub path: String,

    #[serde(default = "default_transport_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtpSettings {
    pub host: String,

    #[serde(default = "default_ftp_port")]
    pub port: u16,

    pub username: String,
    pub password: String,

    #[serde(default)]
    pub path: String,

    #[serde(default = "default_transport_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebdavSettings {
    pub url: String,
    pub username: String,
    pub password: String,

    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifierConfig {
    Webhook(WebhookSettings),
    Telegram(TelegramSettings),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    pub url: String,

    #[serde(default = "default_true")]
    pub on_success: bool,

    #[serde(default = "default_true")]
    pub on_failure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: String,

    #[serde(default = "default_true")]
    pub on_success: bool,

    #[serde(default = "default_true")]
    pub on_failure: bool,
}

impl NotifierConfig {
    pub fn on_success(&self) -> bool {
        match self {
            NotifierConfig::Webhook(w) => w.on_success,
            NotifierConfig::Telegram(t) => t.on_success,
        }
    }

    pub fn on_failure(&self) -> bool {
        match self {
            NotifierConfig::Webhook(w) => w.on_failure,
            NotifierConfig::Telegram(t) => t.on_failure,
        }
    }
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/stashd")
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("stashd")
}

fn default_true() -> bool {
    true
}

fn default_encrypt_type() -> String {
    "openssl".to_string()
}

fn default_suffix_length() -> u32 {
    3
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ftp_port() -> u16 {
    21
}

fn default_transport_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_s3_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, model) in &self.models {
            if let Some(schedule) = &model.schedule {
                if schedule.enabled && schedule.cron.is_none() && schedule.every.is_none() {
                    return Err(Error::Config(format!(
                        "model {name}: schedule needs either cron or every"
                    )));
                }
            }
            if let Some(split) = &model.split {
                if split.chunk_size.is_empty() {
                    return Err(Error::Config(format!(
                        "model {name}: split.chunk_size is required"
                    )));
                }
            }
            if let Some(encrypt) = &model.encrypt {
                if encrypt.kind != "openssl" {
                    return Err(Error::Config(format!(
                        "model {name}: unsupported encrypt type: {}",
                        encrypt.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        state_dir = "/tmp/stashd-state"

        [models.nightly]
        description = "nightly dump"

        [models.nightly.schedule]
        every = "1h"

        [models.nightly.archive]
        includes = ["/etc", "/var/www"]
        excludes = ["/var/www/cache"]

        [models.nightly.compress]
        type = "gz"

        [models.nightly.split]
        chunk_size = "100m"

        [models.nightly.storages.disk]
        type = "local"
        path = "/backups"
        keep = 2

        [models.nightly.storages.offsite]
        type = "s3"
        bucket = "backups"
        access_key_id = "AK"
        secret_access_key = "SK"

        [models.nightly.notifiers.hook]
        type = "webhook"
        url = "https://example.com/hook"
        on_success = false
    "#;

    #[test]
    fn parses_model_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let model = &config.models["nightly"];

        assert_eq!(model.archive.as_ref().unwrap().includes.len(), 2);
        assert_eq!(model.split.as_ref().unwrap().suffix_length, 3);
        assert_eq!(
            model.schedule.as_ref().unwrap().every,
            Some(Duration::from_secs(3600))
        );

        let disk = &model.storages["disk"];
        assert_eq!(disk.keep, 2);
        assert!(matches!(disk.backend, BackendConfig::Local(_)));

        let offsite = &model.storages["offsite"];
        assert_eq!(offsite.keep, 0);
        match &offsite.backend {
            BackendConfig::S3(s3) => {
                assert_eq!(s3.region, "us-east-1");
                assert_eq!(s3.max_retries, 3);
            }
            other => panic!("expected s3 backend, got {}", other.kind()),
        }

        let hook = &model.notifiers["hook"];
        assert!(!hook.on_success());
        assert!(hook.on_failure());
    }

    #[test]
    fn missing_log_table_defaults_to_info() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn rejects_unknown_backend_type() {
        let bad = r#"
            [models.m.storages.d]
            type = "carrier-pigeon"
        "#;
        assert!(toml::from_str::<Config>(bad).is_err());
    }

    #[test]
    fn rejects_enabled_schedule_without_trigger() {
        let bad = r#"
            [models.m.schedule]
            enabled = true
        "#;
        let config: Config = toml::from_str(bad).unwrap();
        assert!(config.validate().is_err());
    }
}
