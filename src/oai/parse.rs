//! `ListRecords` response parsing.

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::format::FormatCodec;
use super::types::{HarvestError, HarvestResult, ListPage, Record, RecordHeader};

/// Error code the repository uses for an empty selection.
const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// Namespace declaration as `(attribute name, raw value)`.
type NsDecl = (String, String);

/// Parse one `ListRecords` response body into a page of records.
///
/// `noRecordsMatch` is an empty page, not an error. Any other `<error>`
/// element becomes `HarvestError::Oai`. Namespaces declared on ancestors of
/// `<metadata>` are re-declared on the payload's root element so that the
/// payload stays well-formed on its own.
///
/// # Errors
///
/// Returns an error if the body is not well-formed, reports an OAI-PMH
/// error, or contains a live record without `<metadata>`.
pub fn parse_list_records(xml: &str, codec: FormatCodec) -> HarvestResult<ListPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage::default();
    let mut saw_list = false;
    let mut saw_empty = false;
    let mut in_header = false;
    let mut header: Option<RecordHeader> = None;
    let mut payload: Option<String> = None;
    // Declarations of every open element whose end tag is still ahead.
    let mut scopes: Vec<Vec<NsDecl>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"error" => {
                    let code = attribute(&e, "code")?.unwrap_or_default();
                    let message = text(&reader.read_text(e.name())?)?;
                    if code == NO_RECORDS_MATCH {
                        saw_empty = true;
                    } else {
                        return Err(HarvestError::Oai { code, message });
                    }
                }
                b"ListRecords" => {
                    saw_list = true;
                    scopes.push(namespace_decls(&e)?);
                }
                b"record" => {
                    header = None;
                    payload = None;
                    scopes.push(namespace_decls(&e)?);
                }
                b"header" => {
                    in_header = true;
                    header = Some(RecordHeader {
                        deleted: attribute(&e, "status")?.as_deref() == Some("deleted"),
                        ..RecordHeader::default()
                    });
                    scopes.push(namespace_decls(&e)?);
                }
                b"identifier" if in_header => {
                    let value = text(&reader.read_text(e.name())?)?;
                    if let Some(h) = header.as_mut() {
                        h.identifier = value;
                    }
                }
                b"datestamp" if in_header => {
                    let value = text(&reader.read_text(e.name())?)?;
                    if let Some(h) = header.as_mut() {
                        h.datestamp = Some(value);
                    }
                }
                b"setSpec" if in_header => {
                    let value = text(&reader.read_text(e.name())?)?;
                    if let Some(h) = header.as_mut() {
                        h.set_specs.push(value);
                    }
                }
                b"metadata" => {
                    let mut in_scope: Vec<NsDecl> = scopes.iter().flatten().cloned().collect();
                    in_scope.extend(namespace_decls(&e)?);
                    let raw = reader.read_text(e.name())?;
                    payload = Some(inherit_namespaces(&(codec.read)(&raw), &in_scope));
                }
                b"resumptionToken" => {
                    page.complete_list_size = list_size(&e)?;
                    let token = text(&reader.read_text(e.name())?)?;
                    page.resumption_token = (!token.is_empty()).then_some(token);
                }
                _ => scopes.push(namespace_decls(&e)?),
            },
            Event::Empty(e) => {
                // <resumptionToken/> closes the list; only the size matters.
                if e.local_name().as_ref() == b"resumptionToken" {
                    page.complete_list_size = list_size(&e)?;
                }
            }
            Event::End(e) => {
                scopes.pop();
                match e.local_name().as_ref() {
                    b"header" => in_header = false,
                    b"record" => page.records.push(finish_record(header.take(), payload.take())?),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_list && !saw_empty {
        return Err(HarvestError::Malformed(
            "response contains neither ListRecords nor an error".to_string(),
        ));
    }

    Ok(page)
}

fn finish_record(header: Option<RecordHeader>, payload: Option<String>) -> HarvestResult<Record> {
    let header = header.ok_or_else(|| HarvestError::Malformed("record without header".to_string()))?;
    if header.identifier.is_empty() {
        return Err(HarvestError::Malformed("record header without identifier".to_string()));
    }

    let payload = match payload {
        Some(p) => p,
        None if header.deleted => String::new(),
        None => {
            return Err(HarvestError::Malformed(format!(
                "record {} has no metadata",
                header.identifier
            )));
        }
    };

    Ok(Record { header, payload })
}

fn namespace_decls(e: &BytesStart<'_>) -> HarvestResult<Vec<NsDecl>> {
    let mut decls = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| HarvestError::Malformed(err.to_string()))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            decls.push((
                String::from_utf8_lossy(key).into_owned(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            ));
        }
    }
    Ok(decls)
}

/// Add the in-scope declarations the payload's root element lacks.
///
/// Later entries in `in_scope` shadow earlier ones with the same name. A
/// payload without a root element is returned as-is.
fn inherit_namespaces(payload: &str, in_scope: &[NsDecl]) -> String {
    if in_scope.is_empty() {
        return payload.to_string();
    }

    let mut reader = Reader::from_str(payload);
    let (root_at, name_len, declared) = loop {
        let before = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                let Ok(declared) = namespace_decls(&e) else {
                    return payload.to_string();
                };
                let Ok(at) = usize::try_from(before) else {
                    return payload.to_string();
                };
                break (at, e.name().as_ref().len(), declared);
            }
            Ok(Event::Eof) | Err(_) => return payload.to_string(),
            Ok(_) => {}
        }
    };

    let mut missing: Vec<&NsDecl> = Vec::new();
    for decl in in_scope.iter().rev() {
        let shadowed = declared.iter().any(|(name, _)| *name == decl.0)
            || missing.iter().any(|(name, _)| *name == decl.0);
        if !shadowed {
            missing.push(decl);
        }
    }
    if missing.is_empty() {
        return payload.to_string();
    }
    missing.reverse();

    let insert_at = root_at + 1 + name_len;
    let mut out = String::with_capacity(payload.len() + 64);
    out.push_str(&payload[..insert_at]);
    for (name, value) in missing {
        out.push_str(&format!(" {name}=\"{}\"", value.replace('"', "&quot;")));
    }
    out.push_str(&payload[insert_at..]);
    out
}

fn attribute(e: &BytesStart<'_>, name: &str) -> HarvestResult<Option<String>> {
    let Some(attr) = e
        .try_get_attribute(name)
        .map_err(|err| HarvestError::Malformed(err.to_string()))?
    else {
        return Ok(None);
    };
    let raw = String::from_utf8_lossy(&attr.value);
    Ok(Some(text(&raw)?))
}

fn list_size(e: &BytesStart<'_>) -> HarvestResult<Option<u64>> {
    Ok(attribute(e, "completeListSize")?.and_then(|v| v.parse().ok()))
}

fn text(raw: &str) -> HarvestResult<String> {
    unescape(raw)
        .map(|v| v.trim().to_string())
        .map_err(|err| HarvestError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oai::format::MetadataFormat;

    fn codec() -> FormatCodec {
        MetadataFormat::MarcXml.codec()
    }

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2016-03-01T10:00:00Z</responseDate>
  <request verb="ListRecords" set="sb" metadataPrefix="marcxml">http://example.org/oai</request>
  <ListRecords>
    <record>
      <header>
        <identifier>oai:nb:1</identifier>
        <datestamp>2016-02-29</datestamp>
        <setSpec>sb</setSpec>
      </header>
      <metadata>
        <marc:record xmlns:marc="http://www.loc.gov/MARC21/slim"><marc:leader>00000nam</marc:leader></marc:record>
      </metadata>
    </record>
    <record>
      <header status="deleted">
        <identifier>oai:nb:2</identifier>
        <datestamp>2016-02-29</datestamp>
      </header>
    </record>
    <resumptionToken completeListSize="1200" cursor="0">sb|marcxml|2||</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    #[test]
    fn test_parse_page_with_token() {
        let page = parse_list_records(PAGE, codec()).unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.resumption_token.as_deref(), Some("sb|marcxml|2||"));
        assert_eq!(page.complete_list_size, Some(1200));

        let first = &page.records[0];
        assert_eq!(first.identifier(), "oai:nb:1");
        assert_eq!(first.header.datestamp.as_deref(), Some("2016-02-29"));
        assert_eq!(first.header.set_specs, vec!["sb".to_string()]);
        assert_eq!(
            first.payload,
            r#"<marc:record xmlns="http://www.openarchives.org/OAI/2.0/" xmlns:marc="http://www.loc.gov/MARC21/slim"><marc:leader>00000nam</marc:leader></marc:record>"#
        );
        assert!(!first.header.deleted);

        assert!(page.records[1].header.deleted);
        assert!(page.records[1].payload.is_empty());
    }

    #[test]
    fn test_empty_token_ends_list() {
        let xml = r#"<OAI-PMH><ListRecords>
            <record><header><identifier>x</identifier></header><metadata><m/></metadata></record>
            <resumptionToken completeListSize="1"/>
        </ListRecords></OAI-PMH>"#;
        let page = parse_list_records(xml, codec()).unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.resumption_token.is_none());
        assert_eq!(page.complete_list_size, Some(1));
    }

    #[test]
    fn test_no_records_match_is_empty() {
        let xml = r#"<OAI-PMH><error code="noRecordsMatch">No matching records</error></OAI-PMH>"#;
        let page = parse_list_records(xml, codec()).unwrap();
        assert!(page.records.is_empty());
        assert!(page.resumption_token.is_none());
    }

    #[test]
    fn test_bad_token_error() {
        let xml = r#"<OAI-PMH><error code="badResumptionToken">Token expired</error></OAI-PMH>"#;
        let err = parse_list_records(xml, codec()).unwrap_err();
        assert!(err.is_bad_token());
        assert!(err.to_string().contains("Token expired"));
    }

    #[test]
    fn test_missing_metadata_is_malformed() {
        let xml = r"<OAI-PMH><ListRecords>
            <record><header><identifier>x</identifier></header></record>
        </ListRecords></OAI-PMH>";
        let err = parse_list_records(xml, codec()).unwrap_err();
        assert!(matches!(err, HarvestError::Malformed(_)));
    }

    #[test]
    fn test_ancestor_namespaces_carried_into_payload() {
        let xml = r#"<OAI-PMH xmlns:marc="http://www.loc.gov/MARC21/slim"><ListRecords>
            <record><header><identifier>x1</identifier></header>
            <metadata><marc:record><marc:controlfield tag="001">x1</marc:controlfield></marc:record></metadata></record>
        </ListRecords></OAI-PMH>"#;
        let page = parse_list_records(xml, codec()).unwrap();
        assert_eq!(
            page.records[0].payload,
            r#"<marc:record xmlns:marc="http://www.loc.gov/MARC21/slim"><marc:controlfield tag="001">x1</marc:controlfield></marc:record>"#
        );
    }

    #[test]
    fn test_metadata_namespace_and_own_declaration() {
        let xml = r#"<OAI-PMH xmlns:marc="http://old"><ListRecords>
            <record><header><identifier>x1</identifier></header>
            <metadata xmlns:marc="http://www.loc.gov/MARC21/slim"><marc:record xmlns:dc="http://dc"><dc:x/></marc:record></metadata></record>
        </ListRecords></OAI-PMH>"#;
        let page = parse_list_records(xml, codec()).unwrap();
        let payload = &page.records[0].payload;
        assert_eq!(payload.matches("xmlns:marc=").count(), 1);
        assert!(payload.contains(r#"xmlns:marc="http://www.loc.gov/MARC21/slim""#));
        assert!(payload.contains(r#"xmlns:dc="http://dc""#));
    }

    #[test]
    fn test_sibling_declarations_do_not_leak() {
        let xml = r#"<OAI-PMH><ListRecords>
            <record><header xmlns:h="http://h"><identifier>x1</identifier></header>
            <metadata><m/></metadata></record>
        </ListRecords></OAI-PMH>"#;
        let page = parse_list_records(xml, codec()).unwrap();
        assert_eq!(page.records[0].payload, "<m/>");
    }

    #[test]
    fn test_not_oai_is_malformed() {
        let err = parse_list_records("<html><body>502</body></html>", codec()).unwrap_err();
        assert!(matches!(err, HarvestError::Malformed(_)));
    }
}
