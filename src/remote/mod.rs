//! Typed access to the remote document store.
//!
//! The store exposes whole-document operations only: list, read, write,
//! delete and rename. [`RemoteStore`] is the seam the sync engine talks to;
//! [`HttpRemote`] speaks the MDFlare HTTP API, [`MemoryRemote`] keeps
//! everything in process, and [`Retrying`] wraps either one with bounded
//! exponential backoff for transient failures.

mod http;
mod memory;
mod retry;

pub use http::HttpRemote;
pub use memory::{CallCounts, MemoryRemote};
pub use retry::{RetryPolicy, Retrying};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure classes of the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials missing, expired or revoked. Refresh identity and retry the
    /// whole operation.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The document does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, throttling or server-side error.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// Optimistic-concurrency rejection. The current backend never sends it.
    #[error("remote conflict: {0}")]
    Conflict(String),

    /// The server refused the request and retrying will not help.
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The response could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Returns true if the call may succeed when simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// Returns true if remote work must pause until credentials are refreshed.
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::AuthRequired(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Remote metadata for one document, as reported by `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// Snapshot of every document the remote store knows about, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTree {
    entries: BTreeMap<String, RemoteEntry>,
}

impl RemoteTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: RemoteEntry) {
        self.entries.insert(path.into(), entry);
    }

    pub fn get(&self, path: &str) -> Option<&RemoteEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RemoteEntry)> {
        self.entries.iter()
    }

    /// Paths strictly below `prefix/`.
    pub fn paths_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.entries
            .keys()
            .filter(move |path| path.starts_with(&prefix))
    }

    /// Keep only the paths accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|path, _| keep(path));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A document read from the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: String,
    pub content: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl Document {
    /// The remote stamp this read observed.
    pub fn stamp(&self) -> RemoteStamp {
        RemoteStamp {
            size: Some(self.size),
            modified: self.modified,
        }
    }
}

/// Acknowledgement of a successful whole-document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteConfirmation {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl WriteConfirmation {
    pub fn stamp(&self) -> RemoteStamp {
        RemoteStamp {
            size: Some(self.size),
            modified: self.modified,
        }
    }
}

/// Size and timestamp identifying one remote version of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteStamp {
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteStamp {
    /// Whether a listing entry still describes the version this stamp was taken from.
    ///
    /// A stamp without a timestamp never matches: the version is unknown and
    /// the document must be re-read.
    pub fn matches(&self, entry: &RemoteEntry) -> bool {
        let Some(modified) = self.modified else {
            return false;
        };
        if entry.modified != Some(modified) {
            return false;
        }
        match (self.size, entry.size) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }
}

impl From<&RemoteEntry> for RemoteStamp {
    fn from(entry: &RemoteEntry) -> Self {
        RemoteStamp {
            size: entry.size,
            modified: entry.modified,
        }
    }
}

/// Whole-document operations against the remote store.
///
/// Implementations are stateless with respect to documents: nothing read or
/// written is retained between calls.
pub trait RemoteStore: Send + Sync {
    /// Enumerate every document under the account root.
    fn list(&self) -> RemoteResult<RemoteTree>;

    /// Read one document. Fails with [`RemoteError::NotFound`] if absent.
    fn read(&self, path: &str) -> RemoteResult<Document>;

    /// Overwrite (or create) a document with the given content.
    fn write(&self, path: &str, content: &str) -> RemoteResult<WriteConfirmation>;

    /// Delete a document, or every document under `path/` when `recursive`.
    ///
    /// Returns the number of documents removed when the backend reports it.
    fn delete(&self, path: &str, recursive: bool) -> RemoteResult<Option<u64>>;

    /// Move a document to a new path.
    ///
    /// The default implementation copies then deletes, and only deletes once
    /// the copy is confirmed, so a failure leaves the old document untouched.
    /// Returns the write confirmation of the new document when known.
    fn rename(&self, old_path: &str, new_path: &str) -> RemoteResult<Option<WriteConfirmation>> {
        let document = self.read(old_path)?;
        let confirmation = self.write(new_path, &document.content)?;
        match self.delete(old_path, false) {
            Ok(_) | Err(RemoteError::NotFound(_)) => Ok(Some(confirmation)),
            Err(e) => Err(e),
        }
    }
}

impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    fn list(&self) -> RemoteResult<RemoteTree> {
        (**self).list()
    }

    fn read(&self, path: &str) -> RemoteResult<Document> {
        (**self).read(path)
    }

    fn write(&self, path: &str, content: &str) -> RemoteResult<WriteConfirmation> {
        (**self).write(path, content)
    }

    fn delete(&self, path: &str, recursive: bool) -> RemoteResult<Option<u64>> {
        (**self).delete(path, recursive)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> RemoteResult<Option<WriteConfirmation>> {
        (**self).rename(old_path, new_path)
    }
}

/// Parse a remote timestamp, tolerating absent or malformed values.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            log::debug!("Ignoring unparseable remote timestamp {raw:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn retryable_errors() {
        assert!(RemoteError::Transient("timeout".into()).is_retryable());
        assert!(!RemoteError::NotFound("a.md".into()).is_retryable());
        assert!(!RemoteError::AuthRequired("expired".into()).is_retryable());
        assert!(!RemoteError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(RemoteError::AuthRequired("expired".into()).is_auth());
    }

    #[test]
    fn stamp_matching() {
        let entry = RemoteEntry {
            size: Some(5),
            modified: at(100),
        };

        let same = RemoteStamp {
            size: Some(5),
            modified: at(100),
        };
        assert!(same.matches(&entry));

        let newer = RemoteEntry {
            size: Some(5),
            modified: at(101),
        };
        assert!(!same.matches(&newer));

        let resized = RemoteEntry {
            size: Some(6),
            modified: at(100),
        };
        assert!(!same.matches(&resized));

        let unknown = RemoteStamp {
            size: Some(5),
            modified: None,
        };
        assert!(!unknown.matches(&entry));

        let sizeless = RemoteEntry {
            size: None,
            modified: at(100),
        };
        assert!(same.matches(&sizeless));
    }

    #[test]
    fn tree_prefix_queries() {
        let mut tree = RemoteTree::new();
        for path in ["notes/a.md", "notes/sub/b.md", "notesX/c.md", "d.md"] {
            tree.insert(
                path,
                RemoteEntry {
                    size: None,
                    modified: None,
                },
            );
        }
        let under: Vec<_> = tree.paths_under("notes").cloned().collect();
        assert_eq!(under, vec!["notes/a.md", "notes/sub/b.md"]);

        tree.retain(|p| p.ends_with("a.md") || p == "d.md");
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn timestamps_parse_leniently() {
        assert_eq!(
            parse_timestamp(Some("1970-01-01T00:01:40Z")),
            at(100)
        );
        assert_eq!(
            parse_timestamp(Some("1970-01-01T09:01:40+09:00")),
            at(100)
        );
        assert_eq!(parse_timestamp(Some("yesterday")), None);
        assert_eq!(parse_timestamp(None), None);
    }
}
