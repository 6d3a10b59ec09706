//! Resumable OAI-PMH listing client.

use std::collections::VecDeque;

use tracing::debug;

use super::format::MetadataFormat;
use super::parse::parse_list_records;
use super::token::ResumptionToken;
use super::transport::{HttpTransport, ListRequest, Transport};
use super::types::{HarvestError, HarvestResult, ListPage, Record};

/// Client for one OAI-PMH repository and metadata format.
#[derive(Debug, Clone)]
pub struct OaiClient<T> {
    transport: T,
    format: MetadataFormat,
}

impl OaiClient<HttpTransport> {
    /// Create a client talking HTTP to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn http(base_url: &str, format: MetadataFormat) -> HarvestResult<Self> {
        Ok(Self::new(HttpTransport::new(base_url)?, format))
    }
}

impl<T: Transport> OaiClient<T> {
    pub fn new(transport: T, format: MetadataFormat) -> Self {
        Self { transport, format }
    }

    /// Metadata format requested from the repository.
    #[must_use]
    pub fn format(&self) -> MetadataFormat {
        self.format
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start a listing of `set` from the beginning.
    ///
    /// No request is made until the first record is pulled.
    #[must_use]
    pub fn list_records(&self, set: &str) -> RecordStream<'_, T> {
        RecordStream::new(
            self,
            ListRequest::Initial {
                set: set.to_string(),
                metadata_prefix: self.format.prefix().to_string(),
            },
        )
    }

    /// Continue a listing from `token`.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` if the token cannot be sent as-is.
    pub fn resume(&self, token: &ResumptionToken) -> HarvestResult<RecordStream<'_, T>> {
        token.validate()?;
        Ok(RecordStream::new(
            self,
            ListRequest::Resume {
                token: token.to_string(),
            },
        ))
    }

    /// Fetch and parse a single page.
    ///
    /// # Errors
    ///
    /// Propagates transport and parse errors unchanged.
    pub async fn fetch_page(&self, request: &ListRequest) -> HarvestResult<ListPage> {
        let body = self.transport.list_records(request).await?;
        parse_list_records(&body, self.format.codec())
    }
}

/// Lazy, page-at-a-time record sequence.
///
/// Records come back in server order. Deleted headers carry no payload and
/// are skipped. An empty page that still carries a token is followed
/// rather than treated as the end of the list.
///
/// [`consumed`](Self::consumed) counts every list position passed so far,
/// deleted headers included, which is what a repository's resumption cursor
/// counts.
pub struct RecordStream<'a, T> {
    client: &'a OaiClient<T>,
    buffer: VecDeque<Record>,
    next: Option<ListRequest>,
    last_token: Option<String>,
    pages: u64,
    delivered: u64,
    deleted_skipped: u64,
}

impl<'a, T: Transport> RecordStream<'a, T> {
    fn new(client: &'a OaiClient<T>, first: ListRequest) -> Self {
        Self {
            client,
            buffer: VecDeque::new(),
            next: Some(first),
            last_token: None,
            pages: 0,
            delivered: 0,
            deleted_skipped: 0,
        }
    }

    /// Pull the next record, fetching the next page when the buffer is empty.
    ///
    /// # Errors
    ///
    /// Transport and protocol errors end the stream; nothing is retried here.
    pub async fn next_record(&mut self) -> HarvestResult<Option<Record>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                if record.header.deleted {
                    self.deleted_skipped += 1;
                    continue;
                }
                self.delivered += 1;
                return Ok(Some(record));
            }

            let Some(request) = self.next.take() else {
                return Ok(None);
            };

            let page = self.client.fetch_page(&request).await?;
            self.pages += 1;

            debug!(
                page = self.pages,
                records = page.records.len(),
                total = ?page.complete_list_size,
                token = page.resumption_token.as_deref().unwrap_or(""),
                "Fetched ListRecords page"
            );

            self.buffer.extend(page.records);

            if let Some(token) = page.resumption_token {
                if self.last_token.as_deref() == Some(token.as_str()) {
                    return Err(HarvestError::Malformed(format!(
                        "repository repeated resumption token '{token}'"
                    )));
                }
                self.last_token = Some(token.clone());
                self.next = Some(ListRequest::Resume { token });
            }
        }
    }

    /// Pages fetched so far.
    #[must_use]
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Records handed out so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Deleted headers dropped so far.
    #[must_use]
    pub fn deleted_skipped(&self) -> u64 {
        self.deleted_skipped
    }

    /// List positions passed so far: delivered records plus skipped deletes.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.delivered + self.deleted_skipped
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Serves canned bodies keyed by the request, recording every call.
    struct CannedTransport {
        pages: HashMap<ListRequest, String>,
        calls: Mutex<Vec<ListRequest>>,
    }

    impl CannedTransport {
        fn new(pages: Vec<(ListRequest, String)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for CannedTransport {
        async fn list_records(&self, request: &ListRequest) -> HarvestResult<String> {
            self.calls.lock().unwrap().push(request.clone());
            self.pages
                .get(request)
                .cloned()
                .ok_or_else(|| HarvestError::Http(format!("no page for {request:?}")))
        }
    }

    fn record(id: &str) -> String {
        format!(
            "<record><header><identifier>{id}</identifier></header><metadata><m id=\"{id}\"/></metadata></record>"
        )
    }

    fn page(records: &[String], token: Option<&str>) -> String {
        let token = token.map_or_else(
            || "<resumptionToken/>".to_string(),
            |t| format!("<resumptionToken>{t}</resumptionToken>"),
        );
        format!("<OAI-PMH><ListRecords>{}{token}</ListRecords></OAI-PMH>", records.concat())
    }

    fn initial(set: &str) -> ListRequest {
        ListRequest::Initial {
            set: set.to_string(),
            metadata_prefix: "marcxml".to_string(),
        }
    }

    fn resume(token: &str) -> ListRequest {
        ListRequest::Resume {
            token: token.to_string(),
        }
    }

    async fn drain<T: Transport>(stream: &mut RecordStream<'_, T>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(r) = stream.next_record().await.unwrap() {
            ids.push(r.identifier().to_string());
        }
        ids
    }

    #[tokio::test]
    async fn test_follows_tokens_until_exhausted() {
        let transport = CannedTransport::new(vec![
            (initial("sb"), page(&[record("a"), record("b")], Some("sb|marcxml|2||"))),
            (resume("sb|marcxml|2||"), page(&[record("c")], None)),
        ]);
        let client = OaiClient::new(transport, MetadataFormat::MarcXml);

        let mut stream = client.list_records("sb");
        assert_eq!(drain(&mut stream).await, vec!["a", "b", "c"]);
        assert_eq!(stream.pages(), 2);
        assert_eq!(stream.delivered(), 3);
        assert_eq!(client.transport().calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_page_with_token_continues() {
        let transport = CannedTransport::new(vec![
            (initial("sb"), page(&[], Some("sb|marcxml|0||"))),
            (resume("sb|marcxml|0||"), page(&[record("a")], None)),
        ]);
        let client = OaiClient::new(transport, MetadataFormat::MarcXml);

        let mut stream = client.list_records("sb");
        assert_eq!(drain(&mut stream).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_resume_starts_from_token() {
        let transport = CannedTransport::new(vec![(
            resume("sb|marcxml|1500||"),
            page(&[record("x")], None),
        )]);
        let client = OaiClient::new(transport, MetadataFormat::MarcXml);

        let token = ResumptionToken::synthetic("sb", "marcxml", 1500);
        let mut stream = client.resume(&token).unwrap();
        assert_eq!(drain(&mut stream).await, vec!["x"]);
        assert_eq!(
            client.transport().calls.lock().unwrap().as_slice(),
            &[resume("sb|marcxml|1500||")]
        );
    }

    #[tokio::test]
    async fn test_deleted_records_skipped() {
        let deleted =
            "<record><header status=\"deleted\"><identifier>gone</identifier></header></record>"
                .to_string();
        let transport = CannedTransport::new(vec![(
            initial("sb"),
            page(&[record("a"), deleted, record("b")], None),
        )]);
        let client = OaiClient::new(transport, MetadataFormat::MarcXml);

        let mut stream = client.list_records("sb");
        assert_eq!(drain(&mut stream).await, vec!["a", "b"]);
        assert_eq!(stream.deleted_skipped(), 1);
        assert_eq!(stream.consumed(), 3);
    }

    #[tokio::test]
    async fn test_consumed_counts_only_positions_passed() {
        let deleted =
            |id: &str| format!("<record><header status=\"deleted\"><identifier>{id}</identifier></header></record>");
        let transport = CannedTransport::new(vec![(
            initial("sb"),
            page(&[deleted("d1"), record("a"), record("b"), deleted("d2")], None),
        )]);
        let client = OaiClient::new(transport, MetadataFormat::MarcXml);

        let mut stream = client.list_records("sb");
        let first = stream.next_record().await.unwrap().unwrap();
        assert_eq!(first.identifier(), "a");
        assert_eq!(stream.consumed(), 2);

        stream.next_record().await.unwrap();
        // d2 is buffered but not yet passed.
        assert_eq!(stream.consumed(), 3);
        assert_eq!(stream.deleted_skipped(), 1);

        assert!(stream.next_record().await.unwrap().is_none());
        assert_eq!(stream.consumed(), 4);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let client = OaiClient::new(CannedTransport::new(vec![]), MetadataFormat::MarcXml);
        let mut stream = client.list_records("sb");
        assert!(matches!(
            stream.next_record().await,
            Err(HarvestError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_repeated_token_is_malformed() {
        let transport = CannedTransport::new(vec![
            (initial("sb"), page(&[record("a")], Some("sb|marcxml|1||"))),
            (resume("sb|marcxml|1||"), page(&[record("b")], Some("sb|marcxml|1||"))),
        ]);
        let client = OaiClient::new(transport, MetadataFormat::MarcXml);

        let mut stream = client.list_records("sb");
        assert!(stream.next_record().await.unwrap().is_some());
        let err = loop {
            match stream.next_record().await {
                Ok(Some(_)) => {}
                Ok(None) => panic!("stream ended without error"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, HarvestError::Malformed(_)));
    }

    #[test]
    fn test_resume_rejects_invalid_token() {
        let client = OaiClient::new(CannedTransport::new(vec![]), MetadataFormat::MarcXml);
        let token = ResumptionToken::synthetic("a|b", "marcxml", 0);
        assert!(client.resume(&token).is_err());
    }
}
