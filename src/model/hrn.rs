//! Catalog identifiers ("HRN" — HERE Resource Name).

use std::fmt;
use std::str::FromStr;

use crate::error::OlpError;

/// The catalog partition, driving which regional lookup endpoint a
/// [`Hrn`] resolves to by default (see `client::endpoints`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HrnPartition {
    Here,
    HereDev,
    HereCn,
    HereCnDev,
}

impl HrnPartition {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "here" => Some(HrnPartition::Here),
            "here-dev" => Some(HrnPartition::HereDev),
            "here-cn" => Some(HrnPartition::HereCn),
            "here-cn-dev" => Some(HrnPartition::HereCnDev),
            _ => None,
        }
    }
}

/// An opaque, colon-delimited catalog identifier, e.g.
/// `hrn:here:data::olp-here-test:hereos-internal-test-v2`.
///
/// Immutable value type; cheap to clone (backed by a single owned string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hrn {
    raw: String,
    partition: HrnPartition,
}

impl Hrn {
    /// Parse an HRN string, validating the `hrn:<partition>:...` shape and
    /// that the partition is one of the finite known values.
    pub fn new(raw: impl Into<String>) -> Result<Self, OlpError> {
        let raw = raw.into();
        let mut parts = raw.splitn(3, ':');
        let scheme = parts.next().unwrap_or_default();
        let partition_str = parts.next().unwrap_or_default();

        if scheme != "hrn" || partition_str.is_empty() {
            return Err(OlpError::InvalidArgument(format!(
                "not a valid HRN: '{raw}'"
            )));
        }

        let partition = HrnPartition::parse(partition_str).ok_or_else(|| {
            OlpError::InvalidArgument(format!("unknown HRN partition: '{partition_str}'"))
        })?;

        Ok(Self { raw, partition })
    }

    /// The full HRN string, as originally supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The partition segment, used to pick a default lookup endpoint.
    pub fn partition(&self) -> HrnPartition {
        self.partition
    }

    /// The string form used as the first component of every cache key
    /// (§6.1) and as the `{hrn}` path segment of `/resources/{hrn}/apis`.
    pub fn to_catalog_hrn_string(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Hrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Hrn {
    type Err = OlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hrn::new(s)
    }
}
