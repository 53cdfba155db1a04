//! Typed identifiers for blocks and documents.
//!
//! A [`Uid`] names a block inside one document: exactly six lowercase ASCII
//! alphanumerics, embedded verbatim in the block's marker line. A
//! [`DocumentId`] names the document itself and is derived deterministically
//! from its URI (UUIDv5), so persisted snapshots survive process restarts.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::marker::ParseError;

/// Number of characters in a block uid.
pub const UID_LEN: usize = 6;

const UID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Block identifier, unique within a document.
///
/// Stored inline as ASCII bytes so the type is `Copy` and cheap to use as a
/// map key. Construction always validates the alphabet.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uid([u8; UID_LEN]);

impl Uid {
    /// Parse a uid, rejecting anything but six `[0-9a-z]` characters.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let bytes = s.as_bytes();
        if bytes.len() != UID_LEN || !bytes.iter().all(|b| is_uid_byte(*b)) {
            return Err(ParseError::InvalidUid(s.to_string()));
        }
        let mut arr = [0u8; UID_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Generate a random uid from the given RNG.
    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut arr = [0u8; UID_LEN];
        for b in arr.iter_mut() {
            *b = UID_ALPHABET[rng.gen_range(0..UID_ALPHABET.len())];
        }
        Self(arr)
    }

    /// Generate a random uid from the thread-local RNG.
    pub fn random() -> Self {
        Self::random_with(&mut rand::thread_rng())
    }

    /// The uid as a string slice.
    pub fn as_str(&self) -> &str {
        // Bytes are validated ASCII at construction.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

/// Whether a byte may appear in a uid.
pub(crate) fn is_uid_byte(b: u8) -> bool {
    b.is_ascii_digit() || b.is_ascii_lowercase()
}

impl FromStr for Uid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Uid {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> String {
        uid.as_str().to_string()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.as_str())
    }
}

/// Fixed namespace for deriving stable DocumentIds from URIs via UUIDv5.
const SYNCWRIGHT_DOCUMENT_NS: uuid::Uuid = uuid::uuid!("5f0c2a7e-3d41-4b8a-9e62-c1d7a4b09f35");

/// Document identity, stable across restarts for the same URI.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

impl DocumentId {
    /// Derive the id for a document URI or path.
    ///
    /// Same input always produces the same output.
    pub fn from_uri(uri: &str) -> Self {
        Self(uuid::Uuid::new_v5(&SYNCWRIGHT_DOCUMENT_NS, uri.as_bytes()))
    }

    /// A fresh random id, for scratch documents that are never persisted.
    pub fn ephemeral() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First 8 hex characters, for display only.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Full 32-character hex string (no hyphens), used as a storage key.
    pub fn to_hex(&self) -> String {
        self.0.as_simple().to_string()
    }

    /// Parse from a hex string or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.short())
    }
}
