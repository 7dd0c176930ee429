use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content-derived token used to decide whether a document changed
///
/// Two documents with equal fingerprints are treated as identical. Tokens are
/// totally ordered so that ties in the conflict policy resolve the same way on
/// every replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a document's text
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        Fingerprint(format!("{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
