//! Composite object identifiers.
//!
//! A client-supplied id may carry several digest algorithms; Winery keys
//! everything off `sha256` alone (they exist for peer backends that key on
//! a different primary hash) but `check` still recomputes every digest it
//! knows how to compute and compares it against what the client supplied.

use std::collections::BTreeMap;
use std::fmt;

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// A composite cryptographic identifier for one object's contents.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    /// The digest Winery actually indexes on.
    pub sha256: [u8; 32],
    /// Any other algorithms the client attached, kept only so `check` can
    /// recompute and compare them.
    pub other: BTreeMap<String, Vec<u8>>,
}

impl ObjectId {
    /// Build an id from a primary digest alone.
    pub fn from_sha256(sha256: [u8; 32]) -> Self {
        Self {
            sha256,
            other: BTreeMap::new(),
        }
    }

    /// Compute the id for a blob the way a client would before calling `add`.
    pub fn for_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let digest: [u8; 32] = hasher.finalize().into();
        Self::from_sha256(digest)
    }

    /// Hex-encoded primary digest, used as the catalog's `signature` key.
    pub fn hex(&self) -> String {
        hex_encode(&self.sha256)
    }

    /// Recompute `sha256` plus every digest in `self.other` that Winery
    /// knows how to compute, and compare against `content`. Used by
    /// `check`. Algorithms Winery has no hasher for are skipped rather
    /// than failed, since it never chose them as primary and can't
    /// adjudicate them.
    pub fn matches(&self, content: &[u8]) -> bool {
        let digest: [u8; 32] = Sha256::digest(content).into();
        if digest != self.sha256 {
            return false;
        }

        for (algo, expected) in &self.other {
            let computed = match algo.as_str() {
                "sha256" => Some(Sha256::digest(content).to_vec()),
                "sha1" => Some(Sha1::digest(content).to_vec()),
                _ => {
                    tracing::debug!(algorithm = %algo, "check: no hasher for this algorithm, skipping");
                    None
                }
            };

            if let Some(computed) = computed {
                if &computed != expected {
                    return false;
                }
            }
        }

        true
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_content_known_digest() {
        let id = ObjectId::for_content(b"SOMETHING");
        assert_eq!(
            id.hex(),
            "866878b165607851782d8d233edf0c261172ff67926330d3bbd10c705b92d24f"
        );
    }

    #[test]
    fn test_matches() {
        let id = ObjectId::for_content(b"content-c");
        assert!(id.matches(b"content-c"));
        assert!(!id.matches(b"content-d"));
    }

    #[test]
    fn test_matches_recomputes_known_secondary_digests() {
        let mut id = ObjectId::for_content(b"content-c");
        id.other
            .insert("sha1".to_string(), Sha1::digest(b"content-c").to_vec());
        assert!(id.matches(b"content-c"));

        id.other.insert("sha1".to_string(), vec![0u8; 20]);
        assert!(!id.matches(b"content-c"));
    }

    #[test]
    fn test_matches_ignores_unknown_secondary_algorithm() {
        let mut id = ObjectId::for_content(b"content-c");
        id.other.insert("blake2s256".to_string(), vec![0u8; 32]);
        assert!(id.matches(b"content-c"));
    }
}
