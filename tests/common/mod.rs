//! Shared fixtures: a paged in-process OAI-PMH repository.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use oai_harvest::oai::{HarvestError, HarvestResult, ListRequest, ResumptionToken, Transport};

/// Records per response page.
pub const PAGE_SIZE: usize = 100;

/// One record served by [`PagedRepository`].
#[derive(Debug, Clone)]
pub struct FakeRecord {
    pub identifier: String,
    /// Value of `993$a`, if tagged.
    pub set_tag: Option<String>,
    pub deleted: bool,
}

/// Records `<prefix>-<n>` for `n` in `range`, tagged with `tag`.
pub fn records(prefix: &str, range: std::ops::Range<usize>, tag: Option<&str>) -> Vec<FakeRecord> {
    range
        .map(|n| FakeRecord {
            identifier: format!("{prefix}-{n}"),
            set_tag: tag.map(ToString::to_string),
            deleted: false,
        })
        .collect()
}

/// Serves `ListRecords` pages of [`PAGE_SIZE`] with tokens
/// `<set>|<prefix>|<offset>||`, like the production repository.
#[derive(Debug, Clone, Default)]
pub struct PagedRepository {
    sets: HashMap<String, Vec<FakeRecord>>,
    requests: Arc<Mutex<Vec<ListRequest>>>,
    /// Declare the MARC namespace once on `<OAI-PMH>` instead of per record.
    marc_ns_on_root: bool,
}

impl PagedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set(mut self, set: &str, records: Vec<FakeRecord>) -> Self {
        self.sets.insert(set.to_string(), records);
        self
    }

    pub fn with_marc_namespace_on_root(mut self) -> Self {
        self.marc_ns_on_root = true;
        self
    }

    pub fn requests(&self) -> Vec<ListRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn render(&self, set: &str, prefix: &str, offset: usize) -> String {
        let all = self.sets.get(set).map_or(&[][..], Vec::as_slice);
        if all.is_empty() {
            return r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"><error code="noRecordsMatch">empty</error></OAI-PMH>"#
                .to_string();
        }

        let end = (offset + PAGE_SIZE).min(all.len());
        let body: String = all[offset.min(all.len())..end]
            .iter()
            .map(|r| render_record(r, !self.marc_ns_on_root))
            .collect();
        let token = if end < all.len() {
            format!(
                r#"<resumptionToken completeListSize="{}" cursor="{offset}">{set}|{prefix}|{end}||</resumptionToken>"#,
                all.len()
            )
        } else {
            format!(r#"<resumptionToken completeListSize="{}" cursor="{offset}"/>"#, all.len())
        };

        let marc_ns = if self.marc_ns_on_root {
            format!(r#" xmlns:marc="{MARC_NS}""#)
        } else {
            String::new()
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"{marc_ns}><responseDate>2016-03-01T10:00:00Z</responseDate><ListRecords>{body}{token}</ListRecords></OAI-PMH>"#
        )
    }
}

const MARC_NS: &str = "http://www.loc.gov/MARC21/slim";

fn render_record(record: &FakeRecord, declare_marc: bool) -> String {
    if record.deleted {
        return format!(
            r#"<record><header status="deleted"><identifier>{}</identifier><datestamp>2016-03-01</datestamp></header></record>"#,
            record.identifier
        );
    }
    let tag = record.set_tag.as_deref().map_or_else(String::new, |t| {
        format!(
            r#"<marc:datafield tag="993" ind1=" " ind2=" "><marc:subfield code="a">{t}</marc:subfield></marc:datafield>"#
        )
    });
    let marc_ns = if declare_marc {
        format!(r#" xmlns:marc="{MARC_NS}""#)
    } else {
        String::new()
    };
    format!(
        r#"<record><header><identifier>{id}</identifier><datestamp>2016-03-01</datestamp></header><metadata><marc:record{marc_ns}><marc:controlfield tag="001">{id}</marc:controlfield>{tag}</marc:record></metadata></record>"#,
        id = record.identifier
    )
}

impl Transport for PagedRepository {
    async fn list_records(&self, request: &ListRequest) -> HarvestResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        match request {
            ListRequest::Initial {
                set,
                metadata_prefix,
            } => Ok(self.render(set, metadata_prefix, 0)),
            ListRequest::Resume { token } => {
                let token: ResumptionToken = token.parse()?;
                let offset = usize::try_from(token.count)
                    .map_err(|e| HarvestError::Malformed(e.to_string()))?;
                Ok(self.render(&token.set, &token.metadata_prefix, offset))
            }
        }
    }
}

/// Identifiers of the records in an export fragment, in order.
pub fn identifiers(xml: &str) -> Vec<String> {
    const OPEN: &str = r#"<marc:controlfield tag="001">"#;
    xml.match_indices(OPEN)
        .filter_map(|(at, _)| {
            let rest = &xml[at + OPEN.len()..];
            rest.find('<').map(|end| rest[..end].to_string())
        })
        .collect()
}

/// Element prefixes in `xml` that no declaration binds.
pub fn unbound_prefixes(xml: &str) -> Vec<String> {
    let mut reader = NsReader::from_str(xml);
    let mut unbound = Vec::new();
    loop {
        match reader.read_resolved_event().unwrap() {
            (ResolveResult::Unknown(prefix), Event::Start(_) | Event::Empty(_)) => {
                unbound.push(String::from_utf8_lossy(&prefix).into_owned());
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }
    unbound
}
