use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::Serialize;

use crate::domain::{ProjectId, StrandTags};
use crate::error::UploaderError;

pub const DEFAULT_CONFIG_PATH: &str = "~/.irida/config.conf";
pub const DEFAULT_UPLOADER: &str = "upload_run.py";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const SAMPLE_LIST_NAME: &str = "SampleList.csv";

/// Credentials section of the IRIDA uploader `config.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IridaConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: &Path) -> Result<IridaConfig, UploaderError> {
        let path = expand_home(path);
        let content =
            fs::read_to_string(&path).map_err(|_| UploaderError::ConfigRead(path.clone()))?;
        Self::parse(&content)
    }

    /// Reads the `[Settings]` section of an INI-style config.
    pub fn parse(content: &str) -> Result<IridaConfig, UploaderError> {
        let mut section = String::new();
        let mut settings = std::collections::HashMap::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))
                .ok_or_else(|| {
                    UploaderError::ConfigParse(format!("line {}: expected key = value", number + 1))
                })?;
            if section == "Settings" {
                settings.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let mut take = |key: &str| {
            settings
                .remove(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| UploaderError::ConfigParse(format!("missing Settings.{key}")))
        };
        Ok(IridaConfig {
            base_url: take("base_url")?.trim_end_matches('/').to_string(),
            client_id: take("client_id")?,
            client_secret: take("client_secret")?,
            username: take("username")?,
            password: take("password")?,
        })
    }
}

/// Replaces a leading `~` with the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// Linear backoff between upload attempts; a zero base disables sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Options shared by discovery, merging and manifest construction.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub input_dir: Utf8PathBuf,
    pub tags: StrandTags,
    pub merge_shards: bool,
    pub work_dir: Option<Utf8PathBuf>,
}

/// Settings of one `upload` run.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub scan: ScanOptions,
    pub project_id: ProjectId,
    pub project_name: Option<String>,
    pub irida_conf: PathBuf,
    pub uploader: PathBuf,
    pub retry: RetryPolicy,
    pub dedup: bool,
}

impl UploadSettings {
    /// Label used to prefix short sample names.
    pub fn project_label(&self) -> String {
        self.project_name
            .clone()
            .unwrap_or_else(|| self.project_id.to_string())
    }
}

/// Settings of one bulk `manifest` run.
#[derive(Debug, Clone)]
pub struct ManifestSettings {
    pub scan: ScanOptions,
    pub project_name: String,
    pub output: Option<Utf8PathBuf>,
}

impl ManifestSettings {
    /// `Basespace-<dir name>`, the project name used for basemount folders.
    pub fn default_project_name(input_dir: &camino::Utf8Path) -> String {
        format!("Basespace-{}", input_dir.file_name().unwrap_or("run"))
    }

    pub fn output_path(&self) -> Utf8PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir())
                .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
            temp.join(format!("{}-Samplesheet.csv", self.project_name))
        })
    }
}
