//! Record and error types for the OAI-PMH protocol layer.

/// Header block of a harvested record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordHeader {
    /// Protocol-assigned identifier, unique within a listing session.
    pub identifier: String,
    /// Datestamp reported by the repository, if any.
    pub datestamp: Option<String>,
    /// `setSpec` values from the header.
    pub set_specs: Vec<String>,
    /// True when the header carries `status="deleted"` (no payload).
    pub deleted: bool,
}

/// One harvested catalog entry.
///
/// The payload is the raw XML found inside `<metadata>`, passed through
/// without being reinterpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: String,
}

impl Record {
    /// Protocol identifier of this record.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.header.identifier
    }
}

/// One parsed `ListRecords` response page.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Records in delivery order, including deleted headers.
    pub records: Vec<Record>,
    /// Token for the next page; `None` when the list is complete.
    pub resumption_token: Option<String>,
    /// `completeListSize` attribute of the resumption token, when reported.
    pub complete_list_size: Option<u64>,
}

/// Protocol-level errors.
///
/// None of these are retried by the protocol layer; the caller decides
/// whether to restart the harvest or abort.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Transport failure talking to the endpoint.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Endpoint answered with a non-success HTTP status.
    #[error("OAI-PMH endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Endpoint answered with an OAI-PMH `<error>` element.
    #[error("OAI-PMH error {code}: {message}")]
    Oai { code: String, message: String },

    /// A resumption token could not be decoded.
    #[error("Malformed resumption token '{token}': {reason}")]
    MalformedToken { token: String, reason: String },

    /// Response body is not a usable `ListRecords` document.
    #[error("Malformed OAI-PMH response: {0}")]
    Malformed(String),
}

impl HarvestError {
    /// True when the repository rejected a resumption token.
    #[must_use]
    pub fn is_bad_token(&self) -> bool {
        match self {
            Self::MalformedToken { .. } => true,
            Self::Oai { code, .. } => code == "badResumptionToken",
            _ => false,
        }
    }
}

impl From<quick_xml::Error> for HarvestError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Result type for protocol operations.
pub type HarvestResult<T> = std::result::Result<T, HarvestError>;
