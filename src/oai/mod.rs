//! OAI-PMH protocol layer.
//!
//! Issues `ListRecords` requests, follows resumption tokens and yields
//! records lazily. The protocol layer never retries; callers decide how to
//! recover from a failed page.

pub mod client;
pub mod format;
pub mod parse;
pub mod token;
pub mod transport;
pub mod types;

pub use client::{OaiClient, RecordStream};
pub use format::{FormatCodec, MetadataFormat, CONTAINER_TAG};
pub use token::ResumptionToken;
pub use transport::{HttpTransport, ListRequest, Transport};
pub use types::{HarvestError, HarvestResult, ListPage, Record, RecordHeader};
