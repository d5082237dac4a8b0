//! The release digest: a SHA-256 identifying one published release.

use std::{fmt, str::FromStr};

use cove_hex::FromHex;
use serde::{Deserialize, Serialize, de, ser};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ParseDigestError {
    #[error("release digest must be exactly 64 hex characters")]
    BadLength,

    #[error("release digest is not valid hex: {0}")]
    BadHex(#[from] cove_hex::DecodeError),
}

/// A release digest: 32 bytes, parsed from exactly 64 hex characters.
/// Uppercase input is accepted and canonicalized; `Display` is always
/// lowercase. Resolved once per verification and never persisted.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct ReleaseDigest([u8; 32]);

impl ReleaseDigest {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for ReleaseDigest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(ParseDigestError::BadLength);
        }
        let bytes = <[u8; 32]>::from_hex(s)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ReleaseDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", cove_hex::display(&self.0))
    }
}

impl fmt::Debug for ReleaseDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReleaseDigest(\"{self}\")")
    }
}

impl Serialize for ReleaseDigest {
    fn serialize<S: ser::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReleaseDigest {
    fn deserialize<D: de::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}
