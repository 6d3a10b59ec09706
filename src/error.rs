//! Error types for the oai-harvest CLI.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=protocol, 3=storage, 4=validation, etc.)
//! - Retryability flags for schedulers deciding whether to rerun
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

use crate::export::ExportError;
use crate::oai::HarvestError;
use crate::snapshot::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes for structured error output.
///
/// Each code maps to a category-based exit code:
/// - 1: Internal
/// - 2: Protocol (endpoint unreachable, OAI-PMH error, rejected token)
/// - 3: Storage (transfer failure, aborted upload, missing object)
/// - 4: Validation (bad arguments)
/// - 7: Configuration
/// - 8: I/O / JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Protocol (exit 2)
    NetworkError,
    ProtocolError,
    BadResumptionToken,

    // Storage (exit 3)
    StorageError,
    StorageTransientError,
    StorageCommitError,
    ObjectNotFound,

    // Validation (exit 4)
    InvalidArgument,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Screaming-snake-case string for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::BadResumptionToken => "BAD_RESUMPTION_TOKEN",
            Self::StorageError => "STORAGE_ERROR",
            Self::StorageTransientError => "STORAGE_TRANSIENT_ERROR",
            Self::StorageCommitError => "STORAGE_COMMIT_ERROR",
            Self::ObjectNotFound => "OBJECT_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NetworkError | Self::ProtocolError | Self::BadResumptionToken => 2,
            Self::StorageError
            | Self::StorageTransientError
            | Self::StorageCommitError
            | Self::ObjectNotFound => 3,
            Self::InvalidArgument => 4,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether rerunning the same command may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::StorageTransientError | Self::StorageCommitError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] HarvestError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<ExportError> for Error {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Protocol(e) => Self::Protocol(e),
            ExportError::Storage(e) => Self::Storage(e),
            ExportError::Io(e) => Self::Io(e),
            ExportError::Config(msg) => Self::Config(msg),
        }
    }
}

impl Error {
    /// Map this error to its machine-readable code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Protocol(e) => match e {
                HarvestError::Http(_) | HarvestError::Status { .. } => ErrorCode::NetworkError,
                HarvestError::MalformedToken { .. } => ErrorCode::BadResumptionToken,
                HarvestError::Oai { .. } | HarvestError::Malformed(_) => ErrorCode::ProtocolError,
            },
            Self::Storage(e) => match e {
                StoreError::Transient { .. } => ErrorCode::StorageTransientError,
                StoreError::Commit { .. } => ErrorCode::StorageCommitError,
                StoreError::NotFound(_) => ErrorCode::ObjectNotFound,
                StoreError::Config(_) => ErrorCode::ConfigError,
                StoreError::Io(_) => ErrorCode::IoError,
                StoreError::Request(_) => ErrorCode::StorageError,
            },
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Protocol(e) if e.is_bad_token() => Some(
                "The repository rejected the resumption token.\n  \
                 Restart:  oai-harvest export <set>\n  \
                 Or resume from a count the repository still accepts."
                    .to_string(),
            ),
            Self::Protocol(HarvestError::Http(_) | HarvestError::Status { .. }) => Some(
                "Check the endpoint (--oai-url / OAI_HARVEST_URL) and network connectivity."
                    .to_string(),
            ),

            Self::Storage(StoreError::Commit { .. } | StoreError::Transient { .. }) => Some(
                "The upload was aborted and the published artifact was not replaced. \
                 Rerun the export."
                    .to_string(),
            ),
            Self::Storage(StoreError::Config(_)) => Some(s3_hint()),

            Self::Config(msg) if msg.contains("S3") => Some(s3_hint()),

            _ => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

fn s3_hint() -> String {
    "Set OAI_HARVEST_S3_KEY, OAI_HARVEST_S3_SECRET and OAI_HARVEST_S3_BUCKET, \
     add them to ~/.oai-harvest/config.json, or use --store local:<dir>."
        .to_string()
}
