//! Identities for model objects
//!
//! Every model object is identified by a 16-byte value. Content is keyed by a
//! 128-bit structural digest so identical bytes share one identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; 16]);

        impl $name {
            /// Generate a fresh random identity
            pub fn new() -> Self {
                Self(*uuid::Uuid::new_v4().as_bytes())
            }

            /// Wrap raw bytes
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Build an identity from an integer (handy for deterministic tests)
            pub const fn from_u128(value: u128) -> Self {
                Self(value.to_be_bytes())
            }

            /// Get raw bytes
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", uuid::Uuid::from_bytes(self.0).hyphenated())
            }
        }
    };
}

define_id!(
    /// Identity of a deck
    DeckId
);
define_id!(
    /// Identity of a slide, stable across decks and peers
    SlideId
);
define_id!(
    /// Identity of a table-of-contents entry
    EntryId
);
define_id!(
    /// Identity of a layer within a slide
    LayerId
);
define_id!(
    /// Identity of a quick poll
    PollId
);
define_id!(
    /// Identity of a session participant
    ParticipantId
);

/// 128-bit digest identifying a shared asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Create a ContentHash from raw bytes
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a ContentHash from an integer value
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_be_bytes())
    }

    /// Compute the digest of some content (leading 128 bits of SHA-256)
    pub fn from_data(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&digest[..16]);
        Self(arr)
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 16 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
