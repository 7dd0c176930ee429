use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::fingerprint::Fingerprint;

/// One of the two replicas of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// One side's version of a diverged document
#[derive(Debug, Clone, Copy)]
pub struct Version<'a> {
    pub fingerprint: &'a Fingerprint,
    pub modified: Option<DateTime<Utc>>,
}

/// Why a side won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The winning side was written more recently
    NewerWrite,
    /// Timestamps were equal or unknown; the greater fingerprint won
    FingerprintTiebreak,
}

/// Decide which version of a diverged document survives
///
/// The more recent write wins. When either timestamp is unknown or both are
/// equal, the lexicographically greater fingerprint wins, so every replica
/// reaches the same verdict for the same pair of versions.
pub fn decide(local: Version<'_>, remote: Version<'_>) -> (Side, Resolution) {
    match (local.modified, remote.modified) {
        (Some(l), Some(r)) if l > r => (Side::Local, Resolution::NewerWrite),
        (Some(l), Some(r)) if r > l => (Side::Remote, Resolution::NewerWrite),
        _ => {
            let winner = if local.fingerprint > remote.fingerprint {
                Side::Local
            } else {
                Side::Remote
            };
            (winner, Resolution::FingerprintTiebreak)
        }
    }
}

/// A divergence that was resolved during a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub winner: Side,
    pub resolution: Resolution,
    pub local_fingerprint: Fingerprint,
    pub remote_fingerprint: Fingerprint,
    pub local_modified: Option<DateTime<Utc>>,
    pub remote_modified: Option<DateTime<Utc>>,
    /// Where the losing version was kept
    pub quarantined: PathBuf,
}

impl Conflict {
    /// Human-readable one-paragraph description
    pub fn description(&self) -> String {
        let when = |t: &Option<DateTime<Utc>>| {
            t.map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        };
        format!(
            "{} diverged, kept {} version ({}):\n  Local: {} last update: {}\n  Remote: {} last update: {}\n  Lost version saved to {}",
            self.path,
            self.winner,
            match self.resolution {
                Resolution::NewerWrite => "newer write",
                Resolution::FingerprintTiebreak => "tiebreak",
            },
            self.local_fingerprint.short(),
            when(&self.local_modified),
            self.remote_fingerprint.short(),
            when(&self.remote_modified),
            self.quarantined.display()
        )
    }
}
