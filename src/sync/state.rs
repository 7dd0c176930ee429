use std::collections::BTreeMap;

use crate::fingerprint::Fingerprint;
use crate::remote::RemoteStamp;

/// What both sides agreed on at the last successful reconciliation of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub fingerprint: Fingerprint,
    /// Remote version observed at that moment; the listing carries no
    /// fingerprint, so this is how remote-side edits are noticed
    pub stamp: RemoteStamp,
}

/// In-memory map of path to [`SyncRecord`]
///
/// Owned by the engine and never persisted: it starts empty, so the first
/// sweep after a restart compares content to rebuild it. Records are only
/// written after a push, pull or resolve succeeded.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    records: BTreeMap<String, SyncRecord>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&SyncRecord> {
        self.records.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    pub fn record(&mut self, path: impl Into<String>, fingerprint: Fingerprint, stamp: RemoteStamp) {
        self.records
            .insert(path.into(), SyncRecord { fingerprint, stamp });
    }

    pub fn forget(&mut self, path: &str) -> Option<SyncRecord> {
        self.records.remove(path)
    }

    /// Tracked paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    /// Tracked paths strictly below `prefix/`
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.records
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SyncRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
