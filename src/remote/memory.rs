use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use super::{
    Document, RemoteEntry, RemoteError, RemoteResult, RemoteStore, RemoteTree, WriteConfirmation,
};

/// Number of calls made against a [`MemoryRemote`], per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub read: usize,
    pub write: usize,
    pub delete: usize,
    pub rename: usize,
}

impl CallCounts {
    /// Calls that change remote state.
    pub fn mutations(&self) -> usize {
        self.write + self.delete + self.rename
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    content: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: BTreeMap<String, StoredDocument>,
    calls: CallCounts,
    /// Failures returned by the next calls touching a path, in order
    injected: HashMap<String, VecDeque<RemoteError>>,
    /// Failures returned by the next calls of any kind, in order
    injected_any: VecDeque<RemoteError>,
    last_modified: Option<DateTime<Utc>>,
}

impl Inner {
    /// Strictly increasing modification stamps, even within one clock tick.
    fn next_modified(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_modified {
            Some(last) if now <= last => last + Duration::milliseconds(1),
            _ => now,
        };
        self.last_modified = Some(stamp);
        stamp
    }

    fn take_failure(&mut self, path: Option<&str>) -> RemoteResult<()> {
        if let Some(err) = self.injected_any.pop_front() {
            return Err(err);
        }
        if let Some(path) = path {
            if let Some(queue) = self.injected.get_mut(path) {
                if let Some(err) = queue.pop_front() {
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// In-process remote store with the same contract as the HTTP backend.
///
/// Keeps documents in memory, counts calls per operation and can be told to
/// fail upcoming calls, which makes it the backend of choice for exercising
/// the engine without a network.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-call
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Place a document directly, as another client would, without counting a call.
    pub fn insert(&self, path: &str, content: &str) -> DateTime<Utc> {
        let mut inner = self.lock();
        let modified = inner.next_modified();
        inner.documents.insert(
            path.to_string(),
            StoredDocument {
                content: content.to_string(),
                modified,
            },
        );
        modified
    }

    /// Place a document with an explicit modification time.
    pub fn insert_at(&self, path: &str, content: &str, modified: DateTime<Utc>) {
        self.lock().documents.insert(
            path.to_string(),
            StoredDocument {
                content: content.to_string(),
                modified,
            },
        );
    }

    /// Remove a document directly, without counting a call.
    pub fn remove(&self, path: &str) -> bool {
        self.lock().documents.remove(path).is_some()
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.lock().documents.get(path).map(|d| d.content.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().documents.keys().cloned().collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    /// Make the next call that touches `path` fail with `err`.
    pub fn fail_next(&self, path: &str, err: RemoteError) {
        self.lock()
            .injected
            .entry(path.to_string())
            .or_default()
            .push_back(err);
    }

    /// Make the next call of any kind fail with `err`.
    pub fn fail_next_call(&self, err: RemoteError) {
        self.lock().injected_any.push_back(err);
    }
}

impl RemoteStore for MemoryRemote {
    fn list(&self) -> RemoteResult<RemoteTree> {
        let mut inner = self.lock();
        inner.calls.list += 1;
        inner.take_failure(None)?;

        let mut tree = RemoteTree::new();
        for (path, doc) in &inner.documents {
            tree.insert(
                path.clone(),
                RemoteEntry {
                    size: Some(doc.content.len() as u64),
                    modified: Some(doc.modified),
                },
            );
        }
        Ok(tree)
    }

    fn read(&self, path: &str) -> RemoteResult<Document> {
        let mut inner = self.lock();
        inner.calls.read += 1;
        inner.take_failure(Some(path))?;

        let doc = inner
            .documents
            .get(path)
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        Ok(Document {
            path: path.to_string(),
            content: doc.content.clone(),
            size: doc.content.len() as u64,
            modified: Some(doc.modified),
        })
    }

    fn write(&self, path: &str, content: &str) -> RemoteResult<WriteConfirmation> {
        let mut inner = self.lock();
        inner.calls.write += 1;
        inner.take_failure(Some(path))?;

        let modified = inner.next_modified();
        inner.documents.insert(
            path.to_string(),
            StoredDocument {
                content: content.to_string(),
                modified,
            },
        );
        Ok(WriteConfirmation {
            size: content.len() as u64,
            modified: Some(modified),
        })
    }

    fn delete(&self, path: &str, recursive: bool) -> RemoteResult<Option<u64>> {
        let mut inner = self.lock();
        inner.calls.delete += 1;
        inner.take_failure(Some(path))?;

        if recursive {
            let prefix = format!("{}/", path.trim_end_matches('/'));
            let before = inner.documents.len();
            inner.documents.retain(|p, _| !p.starts_with(&prefix));
            return Ok(Some((before - inner.documents.len()) as u64));
        }

        match inner.documents.remove(path) {
            Some(_) => Ok(Some(1)),
            None => Err(RemoteError::NotFound(path.to_string())),
        }
    }

    fn rename(&self, old_path: &str, new_path: &str) -> RemoteResult<Option<WriteConfirmation>> {
        let mut inner = self.lock();
        inner.calls.rename += 1;
        inner.take_failure(Some(old_path))?;

        let mut doc = inner
            .documents
            .remove(old_path)
            .ok_or_else(|| RemoteError::NotFound(old_path.to_string()))?;
        doc.modified = inner.next_modified();
        let confirmation = WriteConfirmation {
            size: doc.content.len() as u64,
            modified: Some(doc.modified),
        };
        inner.documents.insert(new_path.to_string(), doc);
        Ok(Some(confirmation))
    }
}
