//! Directory-backed object store.
//!
//! Keys map to paths below a root directory. Metadata lives in a JSON
//! sidecar next to the object, and multipart parts are staged under
//! `.multipart/<upload id>/` until the upload is committed or aborted.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::store::{CompletedPart, KeyPage, ObjectMetadata, ObjectStore, StoreError, StoreResult};

const STAGING_DIR: &str = ".multipart";
const META_SUFFIX: &str = ".meta.json";
const PAGE_SIZE: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    content_disposition: String,
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe || key.ends_with(META_SUFFIX) || key.starts_with(STAGING_DIR) {
            return Err(StoreError::Request(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(upload_id)
    }

    /// Metadata recorded for `key`, if any has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar exists but cannot be read.
    pub fn metadata(&self, key: &str) -> StoreResult<Option<ObjectMetadata>> {
        let sidecar = sidecar_path(&self.path_for(key)?);
        if !sidecar.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&sidecar)?;
        let meta: Sidecar = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Request(format!("corrupt metadata for {key}: {e}")))?;
        Ok(Some(ObjectMetadata {
            content_type: meta.content_type,
            content_disposition: meta.content_disposition,
        }))
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if entry.file_type().await?.is_dir() {
                    if !(dir == self.root && name == STAGING_DIR) {
                        pending.push(path);
                    }
                } else if !name.ends_with(META_SUFFIX) {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        let key: Vec<_> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        keys.push(key.join("/"));
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn sidecar_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_os_string();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

async fn ensure_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn not_found(key: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(e)
    }
}

impl ObjectStore for LocalStore {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> StoreResult<KeyPage> {
        let mut keys: Vec<String> = self
            .all_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation.as_deref().is_none_or(|after| k.as_str() > after))
            .take(PAGE_SIZE + 1)
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
        let path = self.path_for(key)?;
        tokio::fs::copy(&path, dest)
            .await
            .map_err(|e| not_found(key, e))?;
        Ok(())
    }

    async fn put_from_file(&self, key: &str, src: &Path) -> StoreResult<()> {
        let path = self.path_for(key)?;
        ensure_parent(&path).await?;
        tokio::fs::copy(src, &path).await?;
        let _ = tokio::fs::remove_file(sidecar_path(&path)).await;
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> StoreResult<String> {
        self.path_for(key)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        tokio::fs::create_dir_all(self.staging_dir(&id)).await?;
        Ok(id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StoreResult<CompletedPart> {
        let dir = self.staging_dir(upload_id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(format!("upload {upload_id}")));
        }
        tokio::fs::write(dir.join(part_number.to_string()), &body).await?;
        Ok(CompletedPart {
            part_number,
            etag: format!("{:x}", Sha256::digest(&body)),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let dir = self.staging_dir(upload_id);
        ensure_parent(&path).await?;

        let assembled = dir.join("assembled");
        let mut out = tokio::fs::File::create(&assembled).await?;
        for part in &parts {
            let body = tokio::fs::read(dir.join(part.part_number.to_string()))
                .await
                .map_err(|_| StoreError::Request(format!("part {} missing", part.part_number)))?;
            if format!("{:x}", Sha256::digest(&body)) != part.etag {
                return Err(StoreError::Request(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            out.write_all(&body).await?;
        }
        out.flush().await?;
        drop(out);

        tokio::fs::rename(&assembled, &path).await?;
        let _ = tokio::fs::remove_file(sidecar_path(&path)).await;
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> StoreResult<()> {
        let dir = self.staging_dir(upload_id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    async fn replace_metadata(&self, key: &str, metadata: &ObjectMetadata) -> StoreResult<()> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let sidecar = Sidecar {
            content_type: metadata.content_type.clone(),
            content_disposition: metadata.content_disposition.clone(),
        };
        let json = serde_json::to_string_pretty(&sidecar)
            .map_err(|e| StoreError::Request(e.to_string()))?;
        tokio::fs::write(sidecar_path(&path), json).await?;
        Ok(())
    }

    async fn object_size(&self, key: &str) -> StoreResult<u64> {
        let path = self.path_for(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found(key, e))?;
        Ok(meta.len())
    }

    fn public_url(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}
