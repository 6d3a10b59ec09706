//! Export orchestrator.
//!
//! A run moves through `INIT → SEED_BASELINE → STREAMING → FLUSHING* →
//! FINALIZING → UPLOADING → DONE`:
//!
//! - **Init**: incremental (append) runs harvest the base set and keep only
//!   records tagged with the target set; full runs harvest the target set.
//! - **Seed baseline**: incremental runs without a limit download the set's
//!   existing segments. Only objects named like a segment are seeded; the
//!   published artifact and anything else stored beside it are left alone.
//! - **Streaming / flushing**: accepted records are buffered and flushed as
//!   a segment every `batch_size` records, plus once for the remainder.
//! - **Finalizing**: baseline and new segments are concatenated into the
//!   published artifact, wrapped once in `<records>`.
//! - **Uploading**: incremental runs upload the whole working directory,
//!   full runs only the artifact. Metadata is then finalized.
//!
//! A run with a record limit stops after that many accepted records and
//! returns its segments as a checkpoint without publishing anything. The
//! checkpoint's `next_count` is the list position to hand to
//! [`Exporter::resume_export`] next. It counts every record read from the
//! source set, including filtered and deleted ones, so it runs ahead of the
//! accepted count whenever a filter is active.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info};

use super::batch::{parse_segment_count, BatchWriter, DEFAULT_BATCH_SIZE};
use super::file::{concatenate, WorkDir};
use super::filter::{SetFilter, SetTagField};
use super::types::{ExportError, ExportOutcome, ExportRequest, ExportResult, StageStats};
use crate::oai::{MetadataFormat, OaiClient, RecordStream, ResumptionToken, Transport, CONTAINER_TAG};
use crate::snapshot::{ObjectStore, SnapshotStore};

/// Default base set harvested by incremental runs.
pub const DEFAULT_BASE_SET: &str = "NewBib";

/// Default name of the published artifact.
pub const DEFAULT_EXPORT_FILENAME: &str = "records.xml";

/// Settings for one exporter. Built once and never mutated during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    pub format: MetadataFormat,
    pub base_set: String,
    pub export_filename: String,
    pub batch_size: usize,
    pub set_tag: SetTagField,
    /// Parent directory for per-run working directories.
    pub work_root: PathBuf,
    /// Date stamped into segment names; today when `None`.
    pub date: Option<NaiveDate>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: MetadataFormat::default(),
            base_set: DEFAULT_BASE_SET.to_string(),
            export_filename: DEFAULT_EXPORT_FILENAME.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            set_tag: SetTagField::default(),
            work_root: std::env::temp_dir(),
            date: None,
        }
    }
}

impl ExportConfig {
    fn validate(&self) -> ExportResult<()> {
        if self.batch_size == 0 {
            return Err(ExportError::Config("batch size must be positive".to_string()));
        }
        if self.base_set.trim().is_empty() {
            return Err(ExportError::Config("base set must not be empty".to_string()));
        }
        let name = self.export_filename.as_str();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(ExportError::Config(format!(
                "invalid export filename '{name}'"
            )));
        }
        Ok(())
    }
}

/// Drives one OAI-PMH listing into a published snapshot.
pub struct Exporter<T, S> {
    client: OaiClient<T>,
    store: SnapshotStore<S>,
    config: ExportConfig,
}

impl<T: Transport, S: ObjectStore> Exporter<T, S> {
    /// Create an exporter.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the settings are inconsistent or the client
    /// requests a different format than configured.
    pub fn new(client: OaiClient<T>, store: SnapshotStore<S>, config: ExportConfig) -> ExportResult<Self> {
        config.validate()?;
        if client.format() != config.format {
            return Err(ExportError::Config(format!(
                "client requests {} but the export is configured for {}",
                client.format(),
                config.format
            )));
        }
        Ok(Self {
            client,
            store,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SnapshotStore<S> {
        &self.store
    }

    #[must_use]
    pub fn client(&self) -> &OaiClient<T> {
        &self.client
    }

    /// Export `request.set`, publishing the artifact unless a limit is set.
    ///
    /// # Errors
    ///
    /// Protocol and configuration errors abort immediately. Storage errors
    /// surface after the store's own retries are exhausted.
    pub async fn export(&self, request: &ExportRequest) -> ExportResult<ExportOutcome> {
        let (source_set, filter) = self.plan(request)?;
        info!(
            set = %request.set,
            source = source_set,
            append = request.append,
            limit = ?request.limit,
            "Starting export"
        );

        let work = WorkDir::create(&self.config.work_root)?;
        let mut stats = StageStats::default();

        let baseline = if request.append && request.limit.is_none() {
            self.seed_baseline(&request.set, work.path()).await?
        } else {
            Vec::new()
        };
        stats.baseline_segments = baseline.len();

        // New segments continue the baseline's numbering.
        let start = baseline
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| parse_segment_count(&n.to_string_lossy())))
            .max()
            .unwrap_or(0);

        let mut stream = self.client.list_records(source_set);
        let segments = self
            .stream_segments(&mut stream, &request.set, filter.as_ref(), start, request.limit, work.path(), &mut stats)
            .await?;

        self.complete(request, work, baseline, segments, stream.consumed(), stats)
            .await
    }

    /// Continue an interrupted harvest of `set` at list position `count`.
    ///
    /// `count` is a position in the source listing, not a number of accepted
    /// records: pass the `next_count` of the previous checkpoint to chain
    /// limited runs without overlap. Starts from a synthetic resumption token
    /// and skips baseline seeding. Segment names continue from `count`;
    /// `limit` counts records accepted by this call.
    ///
    /// # Errors
    ///
    /// Same as [`Self::export`]; a rejected token is a protocol error.
    pub async fn resume_export(
        &self,
        set: &str,
        append: bool,
        count: u64,
        limit: Option<u64>,
    ) -> ExportResult<ExportOutcome> {
        let request = ExportRequest {
            set: set.to_string(),
            append,
            limit,
        };
        let (source_set, filter) = self.plan(&request)?;
        let token = ResumptionToken::synthetic(source_set, self.config.format.prefix(), count);
        info!(set, token = %token, limit = ?limit, "Resuming export");

        let work = WorkDir::create(&self.config.work_root)?;
        let mut stats = StageStats::default();

        let mut stream = self.client.resume(&token)?;
        let segments = self
            .stream_segments(&mut stream, set, filter.as_ref(), count, limit, work.path(), &mut stats)
            .await?;

        let next_count = count + stream.consumed();
        self.complete(&request, work, Vec::new(), segments, next_count, stats)
            .await
    }

    /// Upload checkpoint segments to the set's prefix so a later
    /// incremental run picks them up as baseline. Returns bytes sent.
    ///
    /// # Errors
    ///
    /// Fails on the first upload error.
    pub async fn persist_segments(&self, set: &str, segments: &[PathBuf]) -> ExportResult<u64> {
        let mut bytes = 0;
        for path in segments {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ExportError::Config(format!("not a file: {}", path.display())))?;
            bytes += self.store.upload_file(&self.store.key_for(set, &name), path).await?;
        }
        info!(set, segments = segments.len(), bytes, "Persisted segments");
        Ok(bytes)
    }

    /// Download every stored object of `set` into `dir`.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn dump(&self, set: &str, dir: &Path) -> ExportResult<Vec<PathBuf>> {
        Ok(self.store.download_set(set, dir, &[]).await?)
    }

    /// Source set and optional filter for a request.
    fn plan<'a>(&'a self, request: &'a ExportRequest) -> ExportResult<(&'a str, Option<SetFilter>)> {
        if request.set.trim().is_empty() {
            return Err(ExportError::Config("set name must not be empty".to_string()));
        }

        let source_set = if request.append {
            self.config.base_set.as_str()
        } else {
            request.set.as_str()
        };
        if source_set == request.set {
            return Ok((source_set, None));
        }

        if !self.config.format.supports_set_tag() {
            return Err(ExportError::Config(format!(
                "set filtering needs {} but the export uses {}",
                MetadataFormat::MarcXml,
                self.config.format
            )));
        }
        Ok((
            source_set,
            Some(SetFilter::new(request.set.clone(), self.config.set_tag.clone())),
        ))
    }

    async fn seed_baseline(&self, set: &str, dir: &Path) -> ExportResult<Vec<PathBuf>> {
        let prefix = self.store.set_prefix(set);
        let mut paths = self
            .store
            .download_matching(&prefix, dir, |name| {
                let segment = parse_segment_count(name).is_some();
                if !segment {
                    debug!(set, name, "Not a segment, left out of baseline");
                }
                segment
            })
            .await?;

        // Key order is lexical; history order is the embedded count.
        paths.sort_by_key(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (parse_segment_count(&name).unwrap_or_default(), name)
        });

        info!(set, segments = paths.len(), "Seeded baseline");
        Ok(paths)
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_segments(
        &self,
        stream: &mut RecordStream<'_, T>,
        set: &str,
        filter: Option<&SetFilter>,
        start: u64,
        limit: Option<u64>,
        dir: &Path,
        stats: &mut StageStats,
    ) -> ExportResult<Vec<PathBuf>> {
        let mut writer = BatchWriter::new(dir, set, self.config.format.codec());
        if let Some(date) = self.config.date {
            writer = writer.with_date(date);
        }

        let mut batch = Vec::with_capacity(self.config.batch_size);
        let mut segments = Vec::new();
        let mut count = start;
        let mut accepted = 0u64;

        while limit.is_none_or(|l| accepted < l) {
            let Some(record) = stream.next_record().await? else {
                break;
            };
            stats.fetched += 1;

            if let Some(filter) = filter {
                if !filter.accepts(&record.payload) {
                    stats.filtered += 1;
                    debug!(identifier = record.identifier(), set, "Record does not belong to set");
                    continue;
                }
            }

            count += 1;
            accepted += 1;
            debug!(count, set, identifier = record.identifier(), "Fetched record");
            batch.push(record);

            if batch.len() >= self.config.batch_size {
                segments.push(writer.write(&batch, count)?);
                batch.clear();
            }
        }

        if !batch.is_empty() {
            segments.push(writer.write(&batch, count)?);
        }

        stats.accepted = accepted;
        stats.deleted_skipped = stream.deleted_skipped();
        stats.segments_written = segments.len();
        Ok(segments)
    }

    async fn complete(
        &self,
        request: &ExportRequest,
        work: WorkDir,
        baseline: Vec<PathBuf>,
        segments: Vec<PathBuf>,
        next_count: u64,
        mut stats: StageStats,
    ) -> ExportResult<ExportOutcome> {
        if request.limit.is_some() {
            let work_dir = work.keep();
            info!(
                set = %request.set,
                accepted = stats.accepted,
                segments = segments.len(),
                next_count,
                work_dir = %work_dir.display(),
                "Stopped at limit"
            );
            return Ok(ExportOutcome::Checkpoint {
                segments,
                work_dir,
                next_count,
                stats,
            });
        }

        let filename = self.config.export_filename.as_str();
        let artifact = work.path().join(filename);
        let mut inputs = baseline;
        inputs.extend(segments);
        let written = concatenate(&artifact, &inputs, Some(CONTAINER_TAG))?;
        debug!(artifact = %artifact.display(), bytes = written, inputs = inputs.len(), "Assembled artifact");

        let key = self.store.key_for(&request.set, filename);
        stats.bytes_uploaded = if request.append {
            self.store.upload_dir(&request.set, work.path()).await?.bytes
        } else {
            self.store.upload_file(&key, &artifact).await?
        };

        self.store.finalize_metadata(&key, filename).await?;
        let size = self.store.size_of(&key).await?;
        let url = self.store.url_of(&key);
        drop(work);

        info!(
            set = %request.set,
            url,
            size,
            fetched = stats.fetched,
            accepted = stats.accepted,
            filtered = stats.filtered,
            deleted_skipped = stats.deleted_skipped,
            segments = stats.segments_written,
            baseline = stats.baseline_segments,
            "Export published"
        );

        Ok(ExportOutcome::Published {
            key,
            url,
            size,
            stats,
        })
    }
}
