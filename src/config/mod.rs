//! Configuration management.
//!
//! Settings come from four places, highest priority first:
//! 1. Command-line flags
//! 2. `OAI_HARVEST_*` environment variables
//! 3. The config file, `~/.oai-harvest/config.json` (or `OAI_HARVEST_CONFIG`)
//! 4. Built-in defaults
//!
//! Resolution happens once per invocation and yields an immutable
//! [`ResolvedConfig`]; nothing below the CLI reads the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::export::{ExportConfig, SetTagField, DEFAULT_BASE_SET, DEFAULT_BATCH_SIZE, DEFAULT_EXPORT_FILENAME};
use crate::oai::MetadataFormat;
use crate::snapshot::multipart::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PARALLELISM,
    DEFAULT_RETRY_DELAY,
};
use crate::snapshot::s3::DEFAULT_REGION;
use crate::snapshot::{MultipartConfig, S3Settings, StoreSpec};

/// Default OAI-PMH endpoint.
pub const DEFAULT_OAI_URL: &str = "http://opac.admin.ch/cgi-bin/nboai/VTLS/Vortex.pl";

/// Default bucket prefix.
pub const DEFAULT_BUCKET_PREFIX: &str = "ch.nb";

/// Sets that default to incremental mode on resume.
pub const DEFAULT_APPEND_SETS: [&str; 2] = ["NewBib", "sb"];

/// S3 credentials and bucket in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Multipart tuning in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultipartSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u64>,
}

/// Contents of the config file. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarvestSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oai_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_sets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart: Option<MultipartSection>,
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub oai_url: Option<String>,
    pub bucket_prefix: Option<String>,
    pub store: Option<String>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub oai_url: String,
    pub bucket_prefix: String,
    pub base_set: String,
    pub append_sets: Vec<String>,
    pub format: MetadataFormat,
    pub export_filename: String,
    pub store: StoreSpec,
    pub work_root: PathBuf,
    pub batch_size: usize,
    pub set_tag: SetTagField,
    pub multipart: MultipartConfig,
}

impl ResolvedConfig {
    /// Export settings for this invocation.
    #[must_use]
    pub fn export_config(&self) -> ExportConfig {
        ExportConfig {
            format: self.format,
            base_set: self.base_set.clone(),
            export_filename: self.export_filename.clone(),
            batch_size: self.batch_size,
            set_tag: self.set_tag.clone(),
            work_root: self.work_root.clone(),
            date: None,
        }
    }

    /// Whether `set` defaults to incremental mode on resume.
    #[must_use]
    pub fn is_append_set(&self, set: &str) -> bool {
        self.append_sets.iter().any(|s| s == set)
    }
}

/// Get the config file path.
///
/// `OAI_HARVEST_CONFIG` overrides the default location.
pub fn config_path() -> Result<PathBuf> {
    if let Some(path) = env_value("OAI_HARVEST_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    directories::BaseDirs::new()
        .map(|b| b.home_dir().join(".oai-harvest").join("config.json"))
        .ok_or(Error::Config("Could not determine home directory".into()))
}

/// Load settings from the config file; missing file means defaults.
pub fn load_settings() -> Result<HarvestSettings> {
    load_settings_from(&config_path()?)
}

/// Load settings from an explicit path.
pub fn load_settings_from(path: &Path) -> Result<HarvestSettings> {
    if !path.exists() {
        return Ok(HarvestSettings::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Save settings to the config file.
pub fn save_settings(settings: &HarvestSettings) -> Result<()> {
    save_settings_to(&config_path()?, settings)
}

/// Save settings to an explicit path.
pub fn save_settings_to(path: &Path, settings: &HarvestSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    fs::write(path, content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))?;

    Ok(())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve settings against the process environment.
pub fn resolve(overrides: &Overrides, settings: &HarvestSettings) -> Result<ResolvedConfig> {
    resolve_with_env(overrides, settings, env_value)
}

/// Resolve settings with an explicit environment lookup.
pub fn resolve_with_env(
    overrides: &Overrides,
    settings: &HarvestSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let oai_url = overrides
        .oai_url
        .clone()
        .or_else(|| env("OAI_HARVEST_URL"))
        .or_else(|| settings.oai_url.clone())
        .unwrap_or_else(|| DEFAULT_OAI_URL.to_string());

    let bucket_prefix = overrides
        .bucket_prefix
        .clone()
        .or_else(|| env("OAI_HARVEST_BUCKET_PREFIX"))
        .or_else(|| settings.bucket_prefix.clone())
        .unwrap_or_else(|| DEFAULT_BUCKET_PREFIX.to_string());

    let store = overrides
        .store
        .clone()
        .or_else(|| env("OAI_HARVEST_STORE"))
        .or_else(|| settings.store.clone())
        .map_or(Ok(StoreSpec::S3), |s| s.parse::<StoreSpec>())?;

    let format = match &settings.metadata_prefix {
        Some(prefix) => prefix.parse::<MetadataFormat>().map_err(Error::Config)?,
        None => MetadataFormat::default(),
    };

    let set_tag = match &settings.set_tag {
        Some(tag) => tag.parse::<SetTagField>().map_err(Error::Config)?,
        None => SetTagField::default(),
    };

    let multipart = settings.multipart.clone().unwrap_or_default();
    let multipart = MultipartConfig {
        chunk_size: multipart.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
        parallelism: multipart.parallelism.unwrap_or(DEFAULT_PARALLELISM),
        max_attempts: multipart.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
        retry_delay: multipart
            .retry_delay_secs
            .map_or(DEFAULT_RETRY_DELAY, Duration::from_secs),
        threshold: multipart.threshold.unwrap_or(DEFAULT_MULTIPART_THRESHOLD),
    };
    if multipart.chunk_size == 0 || multipart.parallelism == 0 || multipart.max_attempts == 0 {
        return Err(Error::Config(
            "multipart chunk_size, parallelism and max_attempts must be positive".to_string(),
        ));
    }

    Ok(ResolvedConfig {
        oai_url,
        bucket_prefix,
        base_set: settings
            .base_set
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_SET.to_string()),
        append_sets: settings
            .append_sets
            .clone()
            .unwrap_or_else(|| DEFAULT_APPEND_SETS.iter().map(ToString::to_string).collect()),
        format,
        export_filename: settings
            .export_filename
            .clone()
            .unwrap_or_else(|| DEFAULT_EXPORT_FILENAME.to_string()),
        store,
        work_root: settings.work_dir.clone().unwrap_or_else(std::env::temp_dir),
        batch_size: settings.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        set_tag,
        multipart,
    })
}

/// S3 settings from the environment and config file.
///
/// Missing values are left empty; the store rejects them when built.
#[must_use]
pub fn resolve_s3_settings(settings: &HarvestSettings) -> S3Settings {
    resolve_s3_settings_with_env(settings, env_value)
}

/// S3 settings with an explicit environment lookup.
#[must_use]
pub fn resolve_s3_settings_with_env(
    settings: &HarvestSettings,
    env: impl Fn(&str) -> Option<String>,
) -> S3Settings {
    let file = settings.s3.clone().unwrap_or_default();
    let pick = |var: &str, value: Option<String>| env(var).or(value).unwrap_or_default();

    S3Settings {
        key: pick("OAI_HARVEST_S3_KEY", file.key),
        secret: pick("OAI_HARVEST_S3_SECRET", file.secret),
        bucket: pick("OAI_HARVEST_S3_BUCKET", file.bucket),
        region: env("OAI_HARVEST_S3_REGION")
            .or(file.region)
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        endpoint: env("OAI_HARVEST_S3_ENDPOINT").or(file.endpoint),
    }
}
