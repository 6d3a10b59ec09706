//! Batch writing and export orchestration.

pub mod batch;
pub mod exporter;
pub mod file;
pub mod filter;
pub mod types;

pub use batch::{BatchWriter, DEFAULT_BATCH_SIZE};
pub use exporter::{ExportConfig, Exporter, DEFAULT_BASE_SET, DEFAULT_EXPORT_FILENAME};
pub use filter::{extract_set_tag, SetFilter, SetTagField};
pub use types::{ExportError, ExportOutcome, ExportRequest, ExportResult, StageStats};
