//! Newtype wrappers for system identities, validated on construction.
//!
//! Both newtypes serialize as plain strings and re-validate on deserialize, so a
//! registry row with a tampered name is rejected instead of reaching a path join.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Maximum length accepted by `useradd`/`groupadd` on the supported distributions.
pub const MAX_NAME_LEN: usize = 32;

fn check_name(kind: &'static str, name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SchemaError::InvalidName {
            kind,
            name: name.to_owned(),
            reason: format!("must be 1-{MAX_NAME_LEN} characters"),
        });
    }
    let mut bytes = name.bytes();
    let first_ok = bytes
        .next()
        .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_');
    if !first_ok {
        return Err(SchemaError::InvalidName {
            kind,
            name: name.to_owned(),
            reason: "must start with a letter, digit or '_'".to_owned(),
        });
    }
    if !bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')) {
        return Err(SchemaError::InvalidName {
            kind,
            name: name.to_owned(),
            reason: "must match [A-Za-z0-9_.-]".to_owned(),
        });
    }
    Ok(())
}

macro_rules! name_newtype {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a name.
            pub fn parse(s: impl Into<String>) -> Result<Self, SchemaError> {
                let s = s.into();
                check_name($kind, &s)?;
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl TryFrom<String> for $name {
            type Error = SchemaError;
            fn try_from(s: String) -> Result<Self, SchemaError> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(n: $name) -> String {
                n.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = SchemaError;
            fn from_str(s: &str) -> Result<Self, SchemaError> {
                Self::parse(s)
            }
        }
    };
}

name_newtype!(
    /// A system account name. Used as the pool name and as a path component.
    Username,
    "username"
);

name_newtype!(
    /// A system group name, written into `group` and `listen.group`.
    GroupName,
    "group"
);
