//! Identity types for recurring escrow
//!
//! All identifiers are fixed-width byte strings wrapped in distinct types so
//! that an agreement id can never be passed where an address is expected.
//! They display and serialize as `0x`-prefixed lowercase hex.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Error returned when parsing a hex identifier fails
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Macro to generate fixed-width byte identifier types with common implementations
macro_rules! define_bytes_type {
    ($name:ident, $len:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width in bytes
            pub const LEN: usize = $len;

            /// The all-zero value
            pub const ZERO: Self = Self([0u8; $len]);

            /// Create from raw bytes
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Create from a slice, which must be exactly the right width
            pub fn from_slice(bytes: &[u8]) -> Result<Self, IdParseError> {
                if bytes.len() != $len {
                    return Err(IdParseError::InvalidLength {
                        expected: $len,
                        actual: bytes.len(),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Ok(Self(out))
            }

            /// Parse from hex (with or without `0x` prefix)
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(|e| IdParseError::InvalidHex(e.to_string()))?;
                Self::from_slice(&bytes)
            }

            /// Get the raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Check whether every byte is zero
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(de::Error::custom)
            }
        }
    };
}

define_bytes_type!(Address, 20, "A 20-byte account address (payer, provider, data service, collector)");
define_bytes_type!(AgreementId, 16, "A 16-byte agreement identifier derived by the recurring collector");
define_bytes_type!(TermsHash, 32, "A 32-byte hash of agreement terms or of an agreement update");

impl Address {
    /// Build an address whose last eight bytes hold `n` (handy for fixtures)
    pub fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }
}
