//! Batch writer.
//!
//! Each batch is first written as one file per record, then those files
//! are concatenated in delivery order into a segment and removed. Segments
//! are bare `<record>` sequences; the container element is added once when
//! the final artifact is assembled.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::{debug, warn};

use super::file::concatenate;
use crate::oai::{FormatCodec, Record};

/// Records per segment.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Extension of segment files.
pub const SEGMENT_SUFFIX: &str = ".xml_part";

const STAGING_DIR: &str = ".batch";

/// `<set>_<count>_<YYYY-MM-DD>.xml_part`
#[must_use]
pub fn segment_file_name(set: &str, count: u64, date: NaiveDate) -> String {
    format!("{set}_{count}_{}{SEGMENT_SUFFIX}", date.format("%Y-%m-%d"))
}

/// Running count embedded in a segment file name.
#[must_use]
pub fn parse_segment_count(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SEGMENT_SUFFIX)?;
    let mut parts = stem.rsplitn(3, '_');
    let _date = parts.next()?;
    let count = parts.next()?;
    parts.next()?;
    count.parse().ok()
}

fn sanitize(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes batches of records as segment files into a directory.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    dir: PathBuf,
    set: String,
    codec: FormatCodec,
    date: NaiveDate,
}

impl BatchWriter {
    /// Writer for `set` stamped with today's local date.
    pub fn new(dir: impl Into<PathBuf>, set: impl Into<String>, codec: FormatCodec) -> Self {
        Self {
            dir: dir.into(),
            set: set.into(),
            codec,
            date: Local::now().date_naive(),
        }
    }

    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `records` as the segment ending at running count `count`.
    ///
    /// # Errors
    ///
    /// Returns an error if a record or the segment cannot be written.
    /// Leftover per-record files are only logged.
    pub fn write(&self, records: &[Record], count: u64) -> io::Result<PathBuf> {
        let staging = self.dir.join(STAGING_DIR);
        fs::create_dir_all(&staging)?;

        let mut files = Vec::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            let path = staging.join(format!("{pos:03}-{}.xml", sanitize(record.identifier())));
            fs::write(&path, (self.codec.write)(record))?;
            files.push(path);
        }

        let segment = self
            .dir
            .join(segment_file_name(&self.set, count, self.date));
        concatenate(&segment, &files, None)?;

        for path in &files {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove record file");
            }
        }
        if let Err(e) = fs::remove_dir(&staging) {
            warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
        }

        debug!(segment = %segment.display(), records = records.len(), count, "Wrote segment");
        Ok(segment)
    }
}
