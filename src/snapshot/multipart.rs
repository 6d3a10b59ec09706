//! Chunked, parallel, retried multipart upload.
//!
//! The file is split by byte offset into chunks. A fixed pool of workers
//! pulls chunks from a shared queue, uploads each with a bounded retry loop
//! and reports the acknowledged parts. The upload is committed only when
//! every planned chunk was acknowledged; anything short of that aborts it.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::store::{CompletedPart, ObjectStore, StoreError, StoreResult};

/// Default chunk size (5 MiB, the S3 minimum part size).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default number of concurrent part uploads.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Default attempts per chunk before the upload is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between attempts of the same chunk.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Files at least this large go through multipart upload.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Largest part number S3 accepts.
const MAX_PARTS: usize = 10_000;

/// Tuning for multipart uploads. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartConfig {
    pub chunk_size: u64,
    pub parallelism: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub threshold: u64,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            threshold: DEFAULT_MULTIPART_THRESHOLD,
        }
    }
}

/// Byte range uploaded as one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub part_number: i32,
    pub offset: u64,
    pub len: u64,
}

/// Result of a committed multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartSummary {
    pub parts: usize,
    pub chunk_size: u64,
    pub bytes: u64,
}

/// Chunk size for a file of `size` bytes.
///
/// `max(default, ceil(sqrt(default) * sqrt(size)))`: grows sub-linearly so
/// large files use fewer, larger parts, and never drops below `default`.
#[must_use]
pub fn chunk_size_for(size: u64, default: u64) -> u64 {
    let product = u128::from(default) * u128::from(size);
    let mut root = product.isqrt();
    if root * root < product {
        root += 1;
    }
    default.max(u64::try_from(root).unwrap_or(u64::MAX))
}

/// Split `size` bytes into consecutive chunks of `chunk_size`.
///
/// An empty file still gets one empty part so the upload can be committed.
///
/// # Errors
///
/// Returns `Config` if the chunk size is zero or the file needs more parts
/// than the store allows.
pub fn plan_chunks(size: u64, chunk_size: u64) -> StoreResult<Vec<ChunkSpec>> {
    if chunk_size == 0 {
        return Err(StoreError::Config("chunk size must be positive".to_string()));
    }

    let count = usize::try_from(size.div_ceil(chunk_size).max(1))
        .map_err(|_| StoreError::Config(format!("file of {size} bytes is too large")))?;
    if count > MAX_PARTS {
        return Err(StoreError::Config(format!(
            "{count} parts exceed the limit of {MAX_PARTS}"
        )));
    }

    let mut chunks = Vec::with_capacity(count);
    let mut offset = 0;
    for index in 0..count {
        let len = chunk_size.min(size - offset);
        chunks.push(ChunkSpec {
            part_number: i32::try_from(index + 1)
                .map_err(|_| StoreError::Config("part number overflow".to_string()))?,
            offset,
            len,
        });
        offset += len;
    }
    Ok(chunks)
}

/// Upload one part, retrying with a fixed delay.
///
/// # Errors
///
/// Returns `Transient` once `max_attempts` attempts have failed.
pub async fn upload_chunk_with_retry<S: ObjectStore>(
    store: &S,
    key: &str,
    upload_id: &str,
    part_number: i32,
    body: Vec<u8>,
    max_attempts: u32,
    delay: Duration,
) -> StoreResult<CompletedPart> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match store
            .upload_part(key, upload_id, part_number, body.clone())
            .await
        {
            Ok(part) => return Ok(part),
            Err(e) if attempt < max_attempts => {
                warn!(part = part_number, attempt, error = %e, "Chunk upload failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(StoreError::Transient {
                    part: part_number,
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Upload `path` to `key` as a multipart upload with `parallelism` workers.
///
/// # Errors
///
/// Returns `Commit` when fewer parts than planned were acknowledged; the
/// upload has been aborted by then. Fails before creating the session if
/// the file cannot be read.
pub async fn multipart_upload<S: ObjectStore>(
    store: &Arc<S>,
    key: &str,
    path: &Path,
    config: &MultipartConfig,
    parallelism: usize,
) -> StoreResult<MultipartSummary> {
    let size = tokio::fs::metadata(path).await?.len();
    let chunk_size = chunk_size_for(size, config.chunk_size);
    let chunks = plan_chunks(size, chunk_size)?;
    let expected = chunks.len();

    let upload_id = store.create_multipart(key).await?;
    info!(key, size, chunk_size, parts = expected, "Started multipart upload");

    let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));
    let abandon = Arc::new(AtomicBool::new(false));
    let workers = parallelism.clamp(1, expected);

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let job = WorkerJob {
            store: Arc::clone(store),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            path: path.to_path_buf(),
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
            queue: Arc::clone(&queue),
            abandon: Arc::clone(&abandon),
        };
        handles.push(tokio::spawn(async move {
            debug!(worker, "Upload worker started");
            job.run().await
        }));
    }

    let mut parts = Vec::with_capacity(expected);
    let mut cause = None;
    for handle in handles {
        match handle.await {
            Ok(report) => {
                parts.extend(report.parts);
                if cause.is_none() {
                    cause = report.error;
                }
            }
            Err(e) => {
                cause.get_or_insert_with(|| format!("upload worker failed: {e}"));
            }
        }
    }

    if parts.len() == expected && cause.is_none() {
        parts.sort_by_key(|p| p.part_number);
        match store.complete_multipart(key, &upload_id, parts).await {
            Ok(()) => {
                info!(key, parts = expected, "Committed multipart upload");
                return Ok(MultipartSummary {
                    parts: expected,
                    chunk_size,
                    bytes: size,
                });
            }
            Err(e) => {
                abort(store.as_ref(), key, &upload_id).await;
                return Err(StoreError::Commit {
                    key: key.to_string(),
                    acknowledged: expected,
                    expected,
                    cause: Some(e.to_string()),
                });
            }
        }
    }

    abort(store.as_ref(), key, &upload_id).await;
    Err(StoreError::Commit {
        key: key.to_string(),
        acknowledged: parts.len(),
        expected,
        cause,
    })
}

async fn abort<S: ObjectStore>(store: &S, key: &str, upload_id: &str) {
    match store.abort_multipart(key, upload_id).await {
        Ok(()) => warn!(key, upload_id, "Aborted multipart upload"),
        Err(e) => warn!(key, upload_id, error = %e, "Failed to abort multipart upload"),
    }
}

struct WorkerJob<S> {
    store: Arc<S>,
    key: String,
    upload_id: String,
    path: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
    queue: Arc<Mutex<VecDeque<ChunkSpec>>>,
    abandon: Arc<AtomicBool>,
}

#[derive(Default)]
struct WorkerReport {
    parts: Vec<CompletedPart>,
    error: Option<String>,
}

impl<S: ObjectStore> WorkerJob<S> {
    async fn run(self) -> WorkerReport {
        let mut report = WorkerReport::default();

        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) => {
                self.abandon.store(true, Ordering::SeqCst);
                report.error = Some(format!("cannot open {}: {e}", self.path.display()));
                return report;
            }
        };

        while !self.abandon.load(Ordering::SeqCst) {
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(chunk) = next else { break };

            let outcome = match read_chunk(&mut file, chunk).await {
                Ok(body) => {
                    upload_chunk_with_retry(
                        self.store.as_ref(),
                        &self.key,
                        &self.upload_id,
                        chunk.part_number,
                        body,
                        self.max_attempts,
                        self.retry_delay,
                    )
                    .await
                }
                Err(e) => Err(StoreError::Io(e)),
            };

            match outcome {
                Ok(part) => report.parts.push(part),
                Err(e) => {
                    self.abandon.store(true, Ordering::SeqCst);
                    report.error = Some(e.to_string());
                }
            }
        }

        report
    }
}

async fn read_chunk(file: &mut tokio::fs::File, chunk: ChunkSpec) -> std::io::Result<Vec<u8>> {
    let len = usize::try_from(chunk.len)
        .map_err(|_| std::io::Error::other("chunk does not fit in memory"))?;
    let mut body = vec![0; len];
    file.seek(SeekFrom::Start(chunk.offset)).await?;
    file.read_exact(&mut body).await?;
    Ok(body)
}
