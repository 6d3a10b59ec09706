//! Job descriptors.
//!
//! A job descriptor names a target set, the append flag and a list of
//! resources. Running the job exports every `oai` resource and records the
//! resulting URL and size on it; other resources only get their size
//! looked up. Fields this module does not know about are kept as-is.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::export::{ExportConfig, ExportError, ExportOutcome, ExportRequest, ExportResult, Exporter};
use crate::oai::{HarvestResult, MetadataFormat, OaiClient, Transport};
use crate::snapshot::{ObjectStore, SnapshotStore, StoreError};

/// Resource type that triggers an export.
pub const OAI_RESOURCE: &str = "oai";

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

/// Accepts `true`, `"True"` and `"true"`.
fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.trim().eq_ignore_ascii_case("true"),
    })
}

/// One resource of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobResource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oai_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_filename: Option<String>,
    /// Set by the run for exported resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Set by the run for every resource found in the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A harvest job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobDescriptor {
    pub id: String,
    /// Target set; the job id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,
    #[serde(default, alias = "append_data", deserialize_with = "flexible_bool")]
    pub append: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oai_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default)]
    pub resources: Vec<JobResource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobDescriptor {
    #[must_use]
    pub fn set(&self) -> &str {
        self.set_name.as_deref().unwrap_or(&self.id)
    }
}

/// Summary of a job run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct JobReport {
    pub resources: usize,
    pub exported: usize,
    pub sized: usize,
}

/// Run the fetch stage of `job`, updating its resources in place.
///
/// `connect` builds a protocol client for a resource's URL and format.
///
/// # Errors
///
/// Fails on the first resource that cannot be exported or sized.
pub async fn run_job<T, S, F>(
    job: &mut JobDescriptor,
    store: &SnapshotStore<S>,
    defaults: &ExportConfig,
    connect: F,
) -> ExportResult<JobReport>
where
    T: Transport,
    S: ObjectStore,
    F: Fn(&str, MetadataFormat) -> HarvestResult<OaiClient<T>>,
{
    let set = job.set().to_string();
    if set.trim().is_empty() {
        return Err(ExportError::Config("job has neither set_name nor id".to_string()));
    }
    let store = match &job.bucket_prefix {
        Some(prefix) => store.with_prefix(prefix.clone()),
        None => store.clone(),
    };

    let mut report = JobReport {
        resources: job.resources.len(),
        ..JobReport::default()
    };

    for resource in &mut job.resources {
        let filename = resource
            .export_filename
            .clone()
            .or_else(|| job.export_filename.clone())
            .unwrap_or_else(|| defaults.export_filename.clone());
        let key = store.key_for(&set, &filename);

        if resource.kind == OAI_RESOURCE {
            let url = resource
                .oai_url
                .as_deref()
                .or(job.oai_url.as_deref())
                .ok_or_else(|| ExportError::Config(format!("oai resource for {set} has no oai_url")))?;
            let format = match resource.metadata_prefix.as_deref().or(job.metadata_prefix.as_deref()) {
                Some(prefix) => prefix.parse::<MetadataFormat>().map_err(ExportError::Config)?,
                None => defaults.format,
            };

            let config = ExportConfig {
                format,
                export_filename: filename.clone(),
                ..defaults.clone()
            };
            let exporter = Exporter::new(connect(url, format)?, store.clone(), config)?;
            let request = ExportRequest {
                set: set.clone(),
                append: job.append,
                limit: job.limit,
            };

            match exporter.export(&request).await? {
                ExportOutcome::Published { url, size, .. } => {
                    info!(set, url, size, "Resource exported");
                    resource.url = Some(url);
                    resource.size = Some(size);
                    report.exported += 1;
                    report.sized += 1;
                }
                ExportOutcome::Checkpoint { work_dir, .. } => {
                    warn!(set, work_dir = %work_dir.display(), "Job limit reached, nothing published");
                }
            }
        } else {
            match store.size_of(&key).await {
                Ok(size) => {
                    resource.size = Some(size);
                    report.sized += 1;
                }
                Err(StoreError::NotFound(_)) => {
                    warn!(key, kind = %resource.kind, "Resource not found in store");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(report)
}
