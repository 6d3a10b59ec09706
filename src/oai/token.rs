//! Resumption token codec.
//!
//! The repository encodes its cursor as
//! `<set>|<metadataPrefix>|<count>|<from>|<until>`, with the date fields left
//! empty when no date range was requested. Because the format is stable, a
//! run can be resumed from nothing more than the set name and the number of
//! records already consumed.

use std::fmt;
use std::str::FromStr;

use super::types::HarvestError;

const SEPARATOR: char = '|';
const FIELD_COUNT: usize = 5;

/// Decoded resumption token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumptionToken {
    pub set: String,
    pub metadata_prefix: String,
    pub count: u64,
    pub from: Option<String>,
    pub until: Option<String>,
}

impl ResumptionToken {
    /// Build a token for `(set, format, count)` with no date range.
    ///
    /// Used to resume a broken run without a server-issued token.
    #[must_use]
    pub fn synthetic(set: impl Into<String>, metadata_prefix: impl Into<String>, count: u64) -> Self {
        Self {
            set: set.into(),
            metadata_prefix: metadata_prefix.into(),
            count,
            from: None,
            until: None,
        }
    }

    /// Reject values that cannot round-trip through the wire format.
    ///
    /// # Errors
    ///
    /// Returns `MalformedToken` if a field is empty or contains the separator.
    pub fn validate(&self) -> Result<(), HarvestError> {
        let fields = [
            ("set", Some(self.set.as_str())),
            ("metadataPrefix", Some(self.metadata_prefix.as_str())),
            ("from", self.from.as_deref()),
            ("until", self.until.as_deref()),
        ];
        for (name, value) in fields {
            if value.is_some_and(|v| v.contains(SEPARATOR)) {
                return Err(self.malformed(format!("{name} contains '{SEPARATOR}'")));
            }
        }
        if self.set.is_empty() || self.metadata_prefix.is_empty() {
            return Err(self.malformed("set and metadataPrefix are required".to_string()));
        }
        Ok(())
    }

    fn malformed(&self, reason: String) -> HarvestError {
        HarvestError::MalformedToken {
            token: self.to_string(),
            reason,
        }
    }
}

impl fmt::Display for ResumptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.set,
            self.metadata_prefix,
            self.count,
            self.from.as_deref().unwrap_or_default(),
            self.until.as_deref().unwrap_or_default(),
        )
    }
}

impl FromStr for ResumptionToken {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| HarvestError::MalformedToken {
            token: s.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = s.split(SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(malformed(&format!(
                "expected {FIELD_COUNT} fields, found {}",
                fields.len()
            )));
        }

        let count = fields[2]
            .parse::<u64>()
            .map_err(|_| malformed("count is not a non-negative integer"))?;
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());

        let token = Self {
            set: fields[0].to_string(),
            metadata_prefix: fields[1].to_string(),
            count,
            from: optional(fields[3]),
            until: optional(fields[4]),
        };
        token.validate()?;
        Ok(token)
    }
}
