//! OAI-PMH harvest exporter.
//!
//! Harvests a set from an OAI-PMH repository, batches its records into
//! segment files and publishes the concatenated export to object storage.
//!
//! # Architecture
//!
//! - [`oai`] - Protocol client, resumption tokens, response parsing
//! - [`export`] - Batch writer, set filter, export orchestration
//! - [`snapshot`] - Object stores (S3, local, memory) and multipart upload
//! - [`job`] - Job descriptors and the fetch stage
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod oai;
pub mod snapshot;

pub use error::{Error, Result};
