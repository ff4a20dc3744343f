use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A PHP runtime version in `major.minor` form ("8.2").
///
/// Ordering is numeric, so `8.10` sorts after `8.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhpVersion {
    major: u32,
    minor: u32,
}

/// Oldest runtime any provider will install or provision pools for.
pub const MIN_SUPPORTED: PhpVersion = PhpVersion { major: 7, minor: 4 };

impl PhpVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let invalid = || SchemaError::InvalidVersion(s.to_owned());
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        let is_number =
            |p: &str| !p.is_empty() && p.len() <= 3 && p.bytes().all(|b| b.is_ascii_digit());
        if !is_number(major) || !is_number(minor) {
            return Err(invalid());
        }
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }

    /// Parse the dotless form used in package and service names ("82" -> 8.2).
    /// The first digit is the major version.
    pub fn from_compact(s: &str) -> Option<Self> {
        if s.len() < 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (major, minor) = s.split_at(1);
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    pub fn major(self) -> u32 {
        self.major
    }

    pub fn minor(self) -> u32 {
        self.minor
    }

    /// Dotless form ("8.2" -> "82").
    pub fn compact(self) -> String {
        format!("{}{}", self.major, self.minor)
    }

    pub fn is_supported(self) -> bool {
        self >= MIN_SUPPORTED
    }
}

impl fmt::Display for PhpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PhpVersion {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, SchemaError> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PhpVersion {
    type Error = SchemaError;
    fn try_from(s: String) -> Result<Self, SchemaError> {
        Self::parse(&s)
    }
}

impl From<PhpVersion> for String {
    fn from(v: PhpVersion) -> String {
        v.to_string()
    }
}
