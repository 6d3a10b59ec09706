//! Set-membership filter.
//!
//! The base set carries every new record. Membership in a narrower set is
//! recorded in a MARC datafield/subfield of the payload (`993$a` by default).

use std::fmt;
use std::str::FromStr;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

/// MARC datafield tag and subfield code holding the set name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetTagField {
    pub tag: String,
    pub code: String,
}

impl Default for SetTagField {
    fn default() -> Self {
        Self {
            tag: "993".to_string(),
            code: "a".to_string(),
        }
    }
}

impl fmt::Display for SetTagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}", self.tag, self.code)
    }
}

impl FromStr for SetTagField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('$') {
            Some((tag, code)) if !tag.is_empty() && !code.is_empty() => Ok(Self {
                tag: tag.to_string(),
                code: code.to_string(),
            }),
            _ => Err(format!("Invalid set tag field '{s}' (expected <tag>$<code>, e.g. 993$a)")),
        }
    }
}

fn attr_is(e: &BytesStart<'_>, name: &str, expected: &str) -> bool {
    matches!(
        e.try_get_attribute(name),
        Ok(Some(attr)) if &*attr.value == expected.as_bytes()
    )
}

/// Value of the first `field` subfield in a MARC XML payload.
///
/// Namespace prefixes are ignored. Returns `None` when the field is absent
/// or the payload cannot be read.
#[must_use]
pub fn extract_set_tag(payload: &str, field: &SetTagField) -> Option<String> {
    let mut reader = Reader::from_str(payload);
    reader.config_mut().trim_text(true);

    let mut in_field = false;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"datafield" => in_field = attr_is(&e, "tag", &field.tag),
                b"subfield" if in_field && attr_is(&e, "code", &field.code) => {
                    let raw = reader.read_text(e.name()).ok()?;
                    return unescape(&raw).ok().map(|v| v.trim().to_string());
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"datafield" => in_field = false,
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// Keeps only records tagged with the target set.
#[derive(Debug, Clone)]
pub struct SetFilter {
    target: String,
    field: SetTagField,
}

impl SetFilter {
    pub fn new(target: impl Into<String>, field: SetTagField) -> Self {
        Self {
            target: target.into(),
            field,
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// True when the payload's tag equals the target set exactly.
    #[must_use]
    pub fn accepts(&self, payload: &str) -> bool {
        extract_set_tag(payload, &self.field).as_deref() == Some(self.target.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marc(set: Option<&str>) -> String {
        let tag = set.map_or_else(String::new, |s| {
            format!(
                r#"<marc:datafield tag="993" ind1=" " ind2=" "><marc:subfield code="b">x</marc:subfield><marc:subfield code="a">{s}</marc:subfield></marc:datafield>"#
            )
        });
        format!(
            r#"<marc:record xmlns:marc="http://www.loc.gov/MARC21/slim"><marc:datafield tag="245" ind1="1" ind2="0"><marc:subfield code="a">Title</marc:subfield></marc:datafield>{tag}</marc:record>"#
        )
    }

    #[test]
    fn test_extract_tag() {
        let field = SetTagField::default();
        assert_eq!(extract_set_tag(&marc(Some("sb")), &field).as_deref(), Some("sb"));
        assert_eq!(extract_set_tag(&marc(None), &field), None);
    }

    #[test]
    fn test_extract_ignores_other_fields() {
        let field: SetTagField = "245$a".parse().unwrap();
        assert_eq!(extract_set_tag(&marc(Some("sb")), &field).as_deref(), Some("Title"));
    }

    #[test]
    fn test_filter_keeps_only_target() {
        let filter = SetFilter::new("A", SetTagField::default());
        let payloads = [marc(Some("A")), marc(Some("B")), marc(None), marc(Some("A"))];
        let kept = payloads.iter().filter(|p| filter.accepts(p)).count();
        assert_eq!(kept, 2);
    }

    #[test]
    fn test_unprefixed_payload() {
        let payload = r#"<record><datafield tag="993"><subfield code="a">sb</subfield></datafield></record>"#;
        assert!(SetFilter::new("sb", SetTagField::default()).accepts(payload));
    }

    #[test]
    fn test_parse_field() {
        assert_eq!("993$a".parse::<SetTagField>().unwrap(), SetTagField::default());
        assert!("993".parse::<SetTagField>().is_err());
        assert_eq!(SetTagField::default().to_string(), "993$a");
    }
}
