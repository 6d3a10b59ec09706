//! Command implementations.
//!
//! Handlers are synchronous; each builds a runtime and blocks on the
//! async pipeline.

pub mod completions;
pub mod dump;
pub mod export;
pub mod job;
pub mod resume;
pub mod version;

use std::future::Future;

use colored::Colorize;
use tracing::debug;

use crate::cli::Cli;
use crate::config::{self, HarvestSettings, Overrides, ResolvedConfig};
use crate::error::{Error, Result};
use crate::export::{ExportOutcome, Exporter};
use crate::oai::{HttpTransport, OaiClient};
use crate::snapshot::{create_store, AnyStore, SnapshotStore};

/// Settings shared by every pipeline command.
pub struct Context {
    pub settings: HarvestSettings,
    pub resolved: ResolvedConfig,
}

impl Context {
    /// Load the config file and resolve it against flags and environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an unreadable config file or invalid values.
    pub fn load(cli: &Cli) -> Result<Self> {
        let settings = config::load_settings()?;
        let overrides = Overrides {
            oai_url: cli.oai_url.clone(),
            bucket_prefix: cli.bucket_prefix.clone(),
            store: cli.store.clone(),
        };
        let resolved = config::resolve(&overrides, &settings)?;
        debug!(
            oai_url = %resolved.oai_url,
            bucket_prefix = %resolved.bucket_prefix,
            store = %resolved.store,
            "Resolved configuration"
        );
        Ok(Self { settings, resolved })
    }

    /// Snapshot store for the resolved backend.
    ///
    /// # Errors
    ///
    /// Returns `Config` when S3 is selected without credentials.
    pub fn store(&self) -> Result<SnapshotStore<AnyStore>> {
        let backend = create_store(&self.resolved.store, || {
            Ok(config::resolve_s3_settings(&self.settings))
        })?;
        Ok(SnapshotStore::new(backend, self.resolved.bucket_prefix.clone())
            .with_multipart(self.resolved.multipart.clone()))
    }

    /// Protocol client for the resolved endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn client(&self) -> Result<OaiClient<HttpTransport>> {
        Ok(OaiClient::http(&self.resolved.oai_url, self.resolved.format)?)
    }

    /// Exporter wired to the resolved endpoint and store.
    ///
    /// # Errors
    ///
    /// Fails on any invalid setting.
    pub fn exporter(&self) -> Result<Exporter<HttpTransport, AnyStore>> {
        let store = self.store()?;
        Ok(Exporter::new(self.client()?, store, self.resolved.export_config())?)
    }
}

/// Run `future` to completion on a fresh multi-threaded runtime.
///
/// # Errors
///
/// Fails if the runtime cannot be created.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;
    Ok(rt.block_on(future))
}

/// Print an export outcome.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_outcome(set: &str, outcome: &ExportOutcome, json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "set": set,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    let stats = outcome.stats();
    match outcome {
        ExportOutcome::Published { url, size, .. } => {
            println!("{} {set}", "Published".green().bold());
            println!();
            println!("  URL:      {url}");
            println!("  Size:     {size} bytes");
        }
        ExportOutcome::Checkpoint {
            segments,
            work_dir,
            next_count,
            ..
        } => {
            println!("{} {set}", "Checkpoint".yellow().bold());
            println!();
            println!("  Location: {}", work_dir.display());
            for segment in segments {
                println!("  Segment:  {}", segment.display());
            }
            println!("  Next:     {next_count} (resume {set} {next_count})");
        }
    }
    println!("  Fetched:  {}", stats.fetched);
    println!("  Accepted: {}", stats.accepted);
    if stats.filtered > 0 {
        println!("  Filtered: {}", stats.filtered);
    }
    if stats.deleted_skipped > 0 {
        println!("  Deleted:  {}", stats.deleted_skipped);
    }
    if stats.baseline_segments > 0 {
        println!("  Baseline: {} segments", stats.baseline_segments);
    }
    println!("  Written:  {} segments", stats.segments_written);
    Ok(())
}
