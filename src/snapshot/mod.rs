//! Object-store snapshot sync.
//!
//! [`ObjectStore`] is the narrow backend interface (S3, local directory,
//! memory). [`SnapshotStore`] adds the per-set key layout, directory
//! transfers, multipart upload and metadata finalization on top.

pub mod bucket;
pub mod factory;
pub mod local;
pub mod memory;
pub mod multipart;
pub mod s3;
pub mod store;

pub use bucket::{KeyListing, SnapshotStore, UploadSummary, XML_CONTENT_TYPE};
pub use factory::{create_store, AnyStore, StoreSpec};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use multipart::{MultipartConfig, MultipartSummary};
pub use s3::{S3Settings, S3Store};
pub use store::{CompletedPart, KeyPage, ObjectMetadata, ObjectStore, StoreError, StoreResult};
