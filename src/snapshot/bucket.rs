//! Snapshot layout on top of an object store.
//!
//! Every set lives under `<bucket-prefix>.<set>/`. The store knows nothing
//! about records; it moves whole files between a local directory and that
//! prefix and finalizes the published artifact's metadata.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::multipart::{multipart_upload, MultipartConfig, MultipartSummary};
use super::store::{ObjectMetadata, ObjectStore, StoreResult};

/// Content type set on published artifacts.
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Totals for a directory upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Snapshot store for one bucket prefix.
pub struct SnapshotStore<S> {
    store: Arc<S>,
    bucket_prefix: String,
    multipart: MultipartConfig,
}

impl<S> Clone for SnapshotStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bucket_prefix: self.bucket_prefix.clone(),
            multipart: self.multipart.clone(),
        }
    }
}

impl<S: ObjectStore> SnapshotStore<S> {
    pub fn new(store: S, bucket_prefix: impl Into<String>) -> Self {
        Self::from_arc(Arc::new(store), bucket_prefix)
    }

    pub fn from_arc(store: Arc<S>, bucket_prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket_prefix: bucket_prefix.into(),
            multipart: MultipartConfig::default(),
        }
    }

    #[must_use]
    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    /// Same backend, different bucket prefix.
    #[must_use]
    pub fn with_prefix(&self, bucket_prefix: impl Into<String>) -> Self {
        Self {
            bucket_prefix: bucket_prefix.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn backend(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn bucket_prefix(&self) -> &str {
        &self.bucket_prefix
    }

    #[must_use]
    pub fn multipart_config(&self) -> &MultipartConfig {
        &self.multipart
    }

    /// `<bucket-prefix>.<set>/`
    #[must_use]
    pub fn set_prefix(&self, set: &str) -> String {
        format!("{}.{set}/", self.bucket_prefix)
    }

    /// `<bucket-prefix>.<set>/<filename>`
    #[must_use]
    pub fn key_for(&self, set: &str, filename: &str) -> String {
        format!("{}{filename}", self.set_prefix(set))
    }

    /// Lazily list keys under `prefix`, one page at a time.
    #[must_use]
    pub fn list(&self, prefix: &str) -> KeyListing<'_, S> {
        KeyListing {
            store: &self.store,
            prefix: prefix.to_string(),
            continuation: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Download every object under `prefix` into `dest`, skipping any whose
    /// file name is in `exclude`. Returns the local paths in key order.
    ///
    /// # Errors
    ///
    /// Fails on the first listing or transfer error.
    pub async fn download(
        &self,
        prefix: &str,
        dest: &Path,
        exclude: &[&str],
    ) -> StoreResult<Vec<PathBuf>> {
        self.download_matching(prefix, dest, |name| !exclude.iter().any(|e| *e == name))
            .await
    }

    /// Download the objects under `prefix` whose file name satisfies `keep`.
    /// Others are never fetched. Returns the local paths in key order.
    ///
    /// # Errors
    ///
    /// Fails on the first listing or transfer error.
    pub async fn download_matching<F>(
        &self,
        prefix: &str,
        dest: &Path,
        keep: F,
    ) -> StoreResult<Vec<PathBuf>>
    where
        F: Fn(&str) -> bool + Send,
    {
        tokio::fs::create_dir_all(dest).await?;

        let mut paths = Vec::new();
        let mut listing = self.list(prefix);
        while let Some(key) = listing.next_key().await? {
            let name = key.rsplit('/').next().unwrap_or(&key);
            if name.is_empty() || !keep(name) {
                debug!(key, "Skipping object");
                continue;
            }
            let path = dest.join(name);
            self.store.get_to_file(&key, &path).await?;
            debug!(key, path = %path.display(), "Downloaded object");
            paths.push(path);
        }

        info!(prefix, count = paths.len(), "Downloaded objects");
        Ok(paths)
    }

    /// Download all objects of `set` except `exclude`.
    ///
    /// # Errors
    ///
    /// See [`Self::download`].
    pub async fn download_set(
        &self,
        set: &str,
        dest: &Path,
        exclude: &[&str],
    ) -> StoreResult<Vec<PathBuf>> {
        self.download(&self.set_prefix(set), dest, exclude).await
    }

    /// Upload a file in a single request.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn upload(&self, key: &str, path: &Path) -> StoreResult<()> {
        self.store.put_from_file(key, path).await?;
        debug!(key, "Uploaded object");
        Ok(())
    }

    /// Chunked parallel upload; see [`multipart_upload`].
    ///
    /// # Errors
    ///
    /// Returns `Commit` if any chunk could not be acknowledged.
    pub async fn multipart_upload(
        &self,
        key: &str,
        path: &Path,
        parallelism: usize,
    ) -> StoreResult<MultipartSummary> {
        multipart_upload(&self.store, key, path, &self.multipart, parallelism).await
    }

    /// Upload a file, switching to multipart above the configured threshold.
    /// Returns the number of bytes sent.
    ///
    /// # Errors
    ///
    /// Propagates upload errors.
    pub async fn upload_file(&self, key: &str, path: &Path) -> StoreResult<u64> {
        let size = tokio::fs::metadata(path).await?.len();
        if size >= self.multipart.threshold {
            self.multipart_upload(key, path, self.multipart.parallelism)
                .await?;
        } else {
            self.upload(key, path).await?;
        }
        Ok(size)
    }

    /// Upload every regular file in `dir` under the set's prefix.
    ///
    /// # Errors
    ///
    /// Fails on the first upload error.
    pub async fn upload_dir(&self, set: &str, dir: &Path) -> StoreResult<UploadSummary> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut summary = UploadSummary::default();
        for path in files {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            summary.bytes += self.upload_file(&self.key_for(set, &name), &path).await?;
            summary.files += 1;
        }

        info!(set, files = summary.files, bytes = summary.bytes, "Uploaded directory");
        Ok(summary)
    }

    /// Mark `key` as a downloadable XML attachment named `filename`.
    ///
    /// # Errors
    ///
    /// Propagates the backend error.
    pub async fn finalize_metadata(&self, key: &str, filename: &str) -> StoreResult<()> {
        let metadata = ObjectMetadata {
            content_type: XML_CONTENT_TYPE.to_string(),
            content_disposition: format!("attachment; filename=\"{filename}\""),
        };
        self.store.replace_metadata(key, &metadata).await
    }

    #[must_use]
    pub fn url_of(&self, key: &str) -> String {
        self.store.public_url(key)
    }

    /// Stored size of `key` in bytes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist.
    pub async fn size_of(&self, key: &str) -> StoreResult<u64> {
        self.store.object_size(key).await
    }
}

/// Lazy key listing, fetching the next page only when needed.
pub struct KeyListing<'a, S> {
    store: &'a S,
    prefix: String,
    continuation: Option<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl<S: ObjectStore> KeyListing<'_, S> {
    /// Next key, or `None` once every page has been consumed.
    ///
    /// # Errors
    ///
    /// Propagates listing errors.
    pub async fn next_key(&mut self) -> StoreResult<Option<String>> {
        loop {
            if let Some(key) = self.buffer.pop_front() {
                return Ok(Some(key));
            }
            if self.exhausted {
                return Ok(None);
            }

            let page = self
                .store
                .list_page(&self.prefix, self.continuation.take())
                .await?;
            self.buffer.extend(page.keys);
            self.exhausted = page.next.is_none();
            self.continuation = page.next;
        }
    }

    /// Drain the remaining keys.
    ///
    /// # Errors
    ///
    /// Propagates listing errors.
    pub async fn collect(mut self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        while let Some(key) = self.next_key().await? {
            keys.push(key);
        }
        Ok(keys)
    }
}
