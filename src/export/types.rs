//! Export types: errors, requests, outcomes and run statistics.

use std::path::PathBuf;

use serde::Serialize;

use crate::oai::HarvestError;
use crate::snapshot::StoreError;

/// What one export call should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    /// Target set name.
    pub set: String,
    /// Incremental (append) mode: harvest the base set, filter to `set`,
    /// and merge with the existing snapshot segments.
    pub append: bool,
    /// Stop after this many accepted records and return a checkpoint.
    pub limit: Option<u64>,
}

impl ExportRequest {
    pub fn full(set: impl Into<String>) -> Self {
        Self {
            set: set.into(),
            append: false,
            limit: None,
        }
    }

    pub fn incremental(set: impl Into<String>) -> Self {
        Self {
            append: true,
            ..Self::full(set)
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Counters for one run.
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct StageStats {
    /// Records pulled from the protocol layer.
    pub fetched: u64,
    /// Records that passed the set filter and were written.
    pub accepted: u64,
    /// Records dropped by the set filter.
    pub filtered: u64,
    /// Deleted headers skipped by the protocol layer.
    pub deleted_skipped: u64,
    /// Segments produced by this run.
    pub segments_written: usize,
    /// Segments seeded from the existing snapshot.
    pub baseline_segments: usize,
    /// Bytes sent to the object store.
    pub bytes_uploaded: u64,
}

/// Result of an export call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    /// The final artifact was published.
    Published {
        key: String,
        url: String,
        size: u64,
        stats: StageStats,
    },
    /// A limited run stopped early. The segments stay in `work_dir`.
    Checkpoint {
        segments: Vec<PathBuf>,
        work_dir: PathBuf,
        /// Source list position to resume from.
        next_count: u64,
        stats: StageStats,
    },
}

impl ExportOutcome {
    #[must_use]
    pub fn stats(&self) -> &StageStats {
        match self {
            Self::Published { stats, .. } | Self::Checkpoint { stats, .. } => stats,
        }
    }

    /// Public URL, if the run published.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Published { url, .. } => Some(url),
            Self::Checkpoint { .. } => None,
        }
    }
}

/// Errors from the export orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Protocol(#[from] HarvestError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export configuration error: {0}")]
    Config(String),
}

/// Result type for export operations.
pub type ExportResult<T> = std::result::Result<T, ExportError>;
