//! Store backend selection.
//!
//! The backend is picked from a short spec string: `s3`, `local:<dir>` or
//! `memory`. S3 settings are only consulted for the `s3` backend.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::local::LocalStore;
use super::memory::MemoryStore;
use super::s3::{S3Settings, S3Store};
use super::store::{CompletedPart, KeyPage, ObjectMetadata, ObjectStore, StoreError, StoreResult};

/// Which backend to use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreSpec {
    #[default]
    S3,
    Local(PathBuf),
    Memory,
}

impl FromStr for StoreSpec {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "s3" => Ok(Self::S3),
            "memory" => Ok(Self::Memory),
            _ => match s.strip_prefix("local:") {
                Some(dir) if !dir.is_empty() => Ok(Self::Local(PathBuf::from(dir))),
                _ => Err(StoreError::Config(format!(
                    "unknown store '{s}' (expected s3, local:<dir> or memory)"
                ))),
            },
        }
    }
}

impl fmt::Display for StoreSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 => f.write_str("s3"),
            Self::Local(dir) => write!(f, "local:{}", dir.display()),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Any of the supported backends behind one concrete type.
#[derive(Debug)]
pub enum AnyStore {
    S3(S3Store),
    Local(LocalStore),
    Memory(MemoryStore),
}

/// Build the backend named by `spec`.
///
/// `s3_settings` is resolved lazily so that non-S3 backends never require
/// credentials.
///
/// # Errors
///
/// Returns `Config` for missing S3 settings, or an I/O error if a local
/// root cannot be created.
pub fn create_store(
    spec: &StoreSpec,
    s3_settings: impl FnOnce() -> StoreResult<S3Settings>,
) -> StoreResult<AnyStore> {
    match spec {
        StoreSpec::S3 => Ok(AnyStore::S3(S3Store::new(&s3_settings()?)?)),
        StoreSpec::Local(dir) => Ok(AnyStore::Local(LocalStore::new(dir)?)),
        StoreSpec::Memory => Ok(AnyStore::Memory(MemoryStore::new("memory"))),
    }
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            AnyStore::S3($store) => $call,
            AnyStore::Local($store) => $call,
            AnyStore::Memory($store) => $call,
        }
    };
}

impl ObjectStore for AnyStore {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> StoreResult<KeyPage> {
        dispatch!(self, s => s.list_page(prefix, continuation).await)
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> StoreResult<()> {
        dispatch!(self, s => s.get_to_file(key, dest).await)
    }

    async fn put_from_file(&self, key: &str, src: &Path) -> StoreResult<()> {
        dispatch!(self, s => s.put_from_file(key, src).await)
    }

    async fn create_multipart(&self, key: &str) -> StoreResult<String> {
        dispatch!(self, s => s.create_multipart(key).await)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StoreResult<CompletedPart> {
        dispatch!(self, s => s.upload_part(key, upload_id, part_number, body).await)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<()> {
        dispatch!(self, s => s.complete_multipart(key, upload_id, parts).await)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        dispatch!(self, s => s.abort_multipart(key, upload_id).await)
    }

    async fn replace_metadata(&self, key: &str, metadata: &ObjectMetadata) -> StoreResult<()> {
        dispatch!(self, s => s.replace_metadata(key, metadata).await)
    }

    async fn object_size(&self, key: &str) -> StoreResult<u64> {
        dispatch!(self, s => s.object_size(key).await)
    }

    fn public_url(&self, key: &str) -> String {
        dispatch!(self, s => s.public_url(key))
    }
}
