//! Supported metadata formats.
//!
//! Each format carries the reader applied to the raw `<metadata>` content
//! and the writer that serializes a record into a segment. Unknown
//! `metadataPrefix` values are rejected when the run is configured.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};

use super::types::Record;

/// Root element wrapped around the final export artifact.
pub const CONTAINER_TAG: &str = "records";

/// Reader/writer pair for one metadata format.
#[derive(Clone, Copy)]
pub struct FormatCodec {
    /// Turns the raw inner XML of `<metadata>` into the stored payload.
    pub read: fn(&str) -> String,
    /// Serializes one record as a complete `<record>` element.
    pub write: fn(&Record) -> String,
}

impl fmt::Debug for FormatCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatCodec").finish_non_exhaustive()
    }
}

/// Closed set of metadata formats the exporter knows how to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFormat {
    /// MARC 21 slim XML (`marcxml`).
    #[default]
    MarcXml,
    /// Unqualified Dublin Core (`oai_dc`).
    OaiDc,
}

impl MetadataFormat {
    /// The `metadataPrefix` sent to the repository.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::MarcXml => "marcxml",
            Self::OaiDc => "oai_dc",
        }
    }

    /// Reader/writer pair for this format.
    #[must_use]
    pub fn codec(self) -> FormatCodec {
        match self {
            Self::MarcXml => FormatCodec {
                read: read_raw,
                write: write_marc_record,
            },
            Self::OaiDc => FormatCodec {
                read: read_raw,
                write: write_generic_record,
            },
        }
    }

    /// Whether the set-membership tag can be read from this format's payload.
    ///
    /// The tag lives in a MARC datafield, so only `marcxml` supports filtering.
    #[must_use]
    pub const fn supports_set_tag(self) -> bool {
        matches!(self, Self::MarcXml)
    }
}

impl fmt::Display for MetadataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for MetadataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "marcxml" | "marc21" => Ok(Self::MarcXml),
            "oai_dc" => Ok(Self::OaiDc),
            other => Err(format!(
                "Unsupported metadata format: {other} (supported: marcxml, oai_dc)"
            )),
        }
    }
}

fn read_raw(inner: &str) -> String {
    inner.trim().to_string()
}

fn write_marc_record(record: &Record) -> String {
    format!("<record>\n{}\n</record>\n", record.payload)
}

fn write_generic_record(record: &Record) -> String {
    let datestamp = record
        .header
        .datestamp
        .as_deref()
        .map_or(Cow::Borrowed(""), |d| escape(d));
    format!(
        "<record identifier=\"{}\" datestamp=\"{}\">\n{}\n</record>\n",
        escape(record.identifier()),
        datestamp,
        record.payload
    )
}
