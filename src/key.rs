//! Content fingerprints used as cache keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Field separator mixed into the digest so that `("ab", "c")` and
/// `("a", "bc")` produce different keys.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Size of a fingerprint in bytes.
pub const KEY_LEN: usize = 32;

/// Classification of a piece of educational content.
///
/// The classification participates in the fingerprint, selects a per-class
/// TTL, and biases the adaptive eviction score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    /// A formal definition of a term.
    Definition,
    /// A theorem, lemma or proposition.
    Theorem,
    /// Equations and mathematical derivations.
    Math,
    /// A worked example.
    Example,
    /// An exercise or practice problem.
    Exercise,
    /// Source code listings.
    Code,
    /// Running prose.
    Narrative,
    /// Anything not covered above.
    Other,
}

impl ContentClass {
    /// All classes, in code order.
    pub const ALL: [ContentClass; 8] = [
        Self::Definition,
        Self::Theorem,
        Self::Math,
        Self::Example,
        Self::Exercise,
        Self::Code,
        Self::Narrative,
        Self::Other,
    ];

    /// Stable lowercase name, used in the fingerprint and the durable index.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Theorem => "theorem",
            Self::Math => "math",
            Self::Example => "example",
            Self::Exercise => "exercise",
            Self::Code => "code",
            Self::Narrative => "narrative",
            Self::Other => "other",
        }
    }

    /// Stable single-byte code for the row encoding.
    pub fn code(&self) -> u8 {
        match self {
            Self::Definition => 0,
            Self::Theorem => 1,
            Self::Math => 2,
            Self::Example => 3,
            Self::Exercise => 4,
            Self::Code => 5,
            Self::Narrative => 6,
            Self::Other => 7,
        }
    }

    /// Inverse of [`ContentClass::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Classes whose embeddings are expensive to lose and cheap to keep.
    pub fn is_high_value(&self) -> bool {
        matches!(self, Self::Definition | Self::Theorem | Self::Math)
    }
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|class| class.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown content class: '{}'", s))
    }
}

/// SHA-256 fingerprint of `(text, model_id, class)`.
///
/// Ordering is lexicographic over the digest bytes, which the adaptive
/// eviction strategies use to break score ties.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FingerprintKey([u8; KEY_LEN]);

impl FingerprintKey {
    /// Compute the fingerprint for a request.
    pub fn compute(text: &str, model_id: &str, class: ContentClass) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(model_id.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(class.as_str().as_bytes());
        Self(hasher.finalize().into())
    }

    /// Wrap raw digest bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Rebuild a key from a slice, as read back from the durable tier.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; KEY_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex rendering of the digest.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(KEY_LEN * 2);
        for byte in self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 bytes are plenty to tell keys apart in logs
        write!(f, "FingerprintKey({}..)", &self.to_hex()[..16])
    }
}
