//! In-process object store.
//!
//! Holds objects and multipart sessions in memory. Used for dry runs and as
//! the store behind the test suite; it can be told to fail specific parts.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};

use super::store::{CompletedPart, KeyPage, ObjectMetadata, ObjectStore, StoreError, StoreResult};

/// Content type assigned to freshly stored objects.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
struct Upload {
    key: String,
    parts: HashMap<i32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, Upload>,
    part_faults: HashMap<i32, u32>,
    next_upload: u64,
    commits: usize,
    aborts: usize,
}

/// Object store backed by a map.
#[derive(Debug)]
pub struct MemoryStore {
    bucket: String,
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `body` under `key` directly.
    pub fn insert(&self, key: &str, body: impl Into<Vec<u8>>) {
        self.lock().objects.insert(key.to_string(), new_object(body.into()));
    }

    /// Body of `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).map(|o| o.body.clone())
    }

    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<ObjectMetadata> {
        self.lock().objects.get(key).map(|o| o.metadata.clone())
    }

    /// All keys in lexical order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Make the next `times` uploads of `part` fail.
    pub fn fail_part(&self, part: i32, times: u32) {
        self.lock().part_faults.insert(part, times);
    }

    /// Multipart uploads committed so far.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    /// Multipart uploads aborted so far.
    #[must_use]
    pub fn aborts(&self) -> usize {
        self.lock().aborts
    }

    /// Multipart sessions neither committed nor aborted.
    #[must_use]
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }
}

fn new_object(body: Vec<u8>) -> StoredObject {
    StoredObject {
        body,
        metadata: ObjectMetadata {
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            content_disposition: String::new(),
        },
    }
}

fn etag(body: &[u8]) -> String {
    format!("{:x}", Sha256::digest(body))
}

impl ObjectStore for MemoryStore {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> StoreResult<KeyPage> {
        let inner = self.lock();
        let mut keys: Vec<String> = inner
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation.as_deref().is_none_or(|after| k.as_str() > after))
            .take(PAGE_SIZE + 1)
            .cloned()
            .collect();

        let next = if keys.len() > PAGE_SIZE {
            keys.truncate(PAGE_SIZE);
            keys.last().cloned()
        } else {
            None
        };
        Ok(KeyPage { keys, next })
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> StoreResult<()> {
        let body = self
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        tokio::fs::write(dest, body).await?;
        Ok(())
    }

    async fn put_from_file(&self, key: &str, src: &Path) -> StoreResult<()> {
        let body = tokio::fs::read(src).await?;
        self.insert(key, body);
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> StoreResult<String> {
        let mut inner = self.lock();
        inner.next_upload += 1;
        let id = format!("upload-{}", inner.next_upload);
        inner.uploads.insert(
            id.clone(),
            Upload {
                key: key.to_string(),
                ..Upload::default()
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StoreResult<CompletedPart> {
        let mut inner = self.lock();
        if let Some(remaining) = inner.part_faults.get_mut(&part_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Request(format!(
                    "injected failure for part {part_number}"
                )));
            }
        }

        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("upload {upload_id}")))?;
        let tag = etag(&body);
        upload.parts.insert(part_number, (tag.clone(), body));
        Ok(CompletedPart {
            part_number,
            etag: tag,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let upload = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StoreError::NotFound(format!("upload {upload_id}")))?;
        if upload.key != key {
            return Err(StoreError::Request(format!(
                "upload {upload_id} belongs to {}",
                upload.key
            )));
        }

        let mut body = Vec::new();
        let mut previous = 0;
        for part in &parts {
            if part.part_number <= previous {
                return Err(StoreError::Request("parts must be in ascending order".to_string()));
            }
            previous = part.part_number;
            let (tag, bytes) = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| StoreError::Request(format!("part {} missing", part.part_number)))?;
            if *tag != part.etag {
                return Err(StoreError::Request(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            body.extend_from_slice(bytes);
        }

        inner.objects.insert(key.to_string(), new_object(body));
        inner.commits += 1;
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.uploads.remove(upload_id);
        inner.aborts += 1;
        Ok(())
    }

    async fn replace_metadata(&self, key: &str, metadata: &ObjectMetadata) -> StoreResult<()> {
        let mut inner = self.lock();
        let object = inner
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        object.metadata = metadata.clone();
        Ok(())
    }

    async fn object_size(&self, key: &str) -> StoreResult<u64> {
        self.lock()
            .objects
            .get(key)
            .map(|o| o.body.len() as u64)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}/{key}", self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_pages_through_continuation() {
        let store = MemoryStore::new("b");
        for i in 0..(PAGE_SIZE + 5) {
            store.insert(&format!("p/{i:05}"), "x");
        }
        store.insert("other/1", "x");

        let first = store.list_page("p/", None).await.unwrap();
        assert_eq!(first.keys.len(), PAGE_SIZE);
        let second = store.list_page("p/", first.next).await.unwrap();
        assert_eq!(second.keys.len(), 5);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn test_multipart_assembles_in_part_order() {
        let store = MemoryStore::new("b");
        let id = store.create_multipart("k").await.unwrap();
        let second = store.upload_part("k", &id, 2, b"world".to_vec()).await.unwrap();
        let first = store.upload_part("k", &id, 1, b"hello ".to_vec()).await.unwrap();

        store.complete_multipart("k", &id, vec![first, second]).await.unwrap();
        assert_eq!(store.get("k").unwrap(), b"hello world");
        assert_eq!(store.commits(), 1);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_complete_rejects_missing_part() {
        let store = MemoryStore::new("b");
        let id = store.create_multipart("k").await.unwrap();
        let part = CompletedPart {
            part_number: 1,
            etag: "nope".to_string(),
        };
        assert!(store.complete_multipart("k", &id, vec![part]).await.is_err());
        assert!(store.get("k").is_none());
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let store = MemoryStore::new("b");
        let id = store.create_multipart("k").await.unwrap();
        store.fail_part(1, 1);
        assert!(store.upload_part("k", &id, 1, vec![1]).await.is_err());
        assert!(store.upload_part("k", &id, 1, vec![1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_replace_metadata() {
        let store = MemoryStore::new("b");
        store.insert("k", "x");
        assert_eq!(store.metadata("k").unwrap().content_type, DEFAULT_CONTENT_TYPE);

        let meta = ObjectMetadata {
            content_type: "application/xml; charset=utf-8".to_string(),
            content_disposition: "attachment; filename=\"records.xml\"".to_string(),
        };
        store.replace_metadata("k", &meta).await.unwrap();
        assert_eq!(store.metadata("k").unwrap(), meta);
        assert!(store.replace_metadata("missing", &meta).await.is_err());
    }
}
