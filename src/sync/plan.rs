use std::collections::{BTreeSet, HashSet};

use super::state::{SyncRecord, SyncState};
use crate::remote::{RemoteEntry, RemoteTree};
use crate::scanner::LocalSnapshot;

/// One step of a full sweep, decided from listings alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Copy the remote version over the local one
    Pull { path: String },
    /// Copy the local version over the remote one
    Push { path: String },
    /// Present on both sides with no common ground in the listings; read the
    /// remote and compare content
    Resolve { path: String },
    /// Deleted remotely, unchanged locally
    DeleteLocal { path: String },
    /// Deleted locally, remote untouched since the last agreement. With
    /// `verify` set the remote version is unknown and must be read first.
    DeleteRemote { path: String, verify: bool },
    /// A local move of an unchanged document
    Rename { from: String, to: String },
    /// Gone on both sides; only the record remains
    Forget { path: String },
}

impl SyncAction {
    /// The path a failure of this action is reported under
    pub fn path(&self) -> &str {
        match self {
            SyncAction::Pull { path }
            | SyncAction::Push { path }
            | SyncAction::Resolve { path }
            | SyncAction::DeleteLocal { path }
            | SyncAction::DeleteRemote { path, .. }
            | SyncAction::Forget { path } => path,
            SyncAction::Rename { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteChange {
    Unchanged,
    Changed,
    /// The record carries no remote timestamp
    Unknown,
}

fn remote_change(record: &SyncRecord, entry: &RemoteEntry) -> RemoteChange {
    if record.stamp.modified.is_none() {
        RemoteChange::Unknown
    } else if record.stamp.matches(entry) {
        RemoteChange::Unchanged
    } else {
        RemoteChange::Changed
    }
}

/// Three-way diff of the remote listing, the local scan and the sync state
///
/// Actions come back in path order, renames first. Paths the scan found on
/// disk but could not read get no action at all. Nothing here performs I/O;
/// the engine re-checks every decision against the live filesystem before it
/// overwrites or deletes anything.
pub fn plan(remote: &RemoteTree, local: &LocalSnapshot, state: &SyncState) -> Vec<SyncAction> {
    let paths: BTreeSet<&String> = remote
        .paths()
        .chain(local.keys())
        .chain(state.paths())
        .collect();

    let mut actions = Vec::new();

    for path in paths {
        if local.is_unsyncable(path) {
            continue;
        }
        let path = path.clone();
        let action = match (remote.get(&path), local.get(&path), state.get(&path)) {
            (Some(_), Some(_), None) => Some(SyncAction::Resolve { path }),
            (Some(_), None, None) => Some(SyncAction::Pull { path }),
            (None, Some(_), None) => Some(SyncAction::Push { path }),
            (None, None, None) => None,

            (Some(entry), Some(doc), Some(record)) => {
                let local_changed = doc.fingerprint != record.fingerprint;
                match (local_changed, remote_change(record, entry)) {
                    (false, RemoteChange::Unchanged) => None,
                    (true, RemoteChange::Unchanged) => Some(SyncAction::Push { path }),
                    (false, _) => Some(SyncAction::Pull { path }),
                    (true, _) => Some(SyncAction::Resolve { path }),
                }
            }

            // Local gone: delete remotely unless the remote moved on, in
            // which case the edit wins over the delete
            (Some(entry), None, Some(record)) => match remote_change(record, entry) {
                RemoteChange::Unchanged => Some(SyncAction::DeleteRemote {
                    path,
                    verify: false,
                }),
                RemoteChange::Unknown => Some(SyncAction::DeleteRemote { path, verify: true }),
                RemoteChange::Changed => Some(SyncAction::Pull { path }),
            },

            // Remote gone: delete locally unless the local copy moved on
            (None, Some(doc), Some(record)) => {
                if doc.fingerprint == record.fingerprint {
                    Some(SyncAction::DeleteLocal { path })
                } else {
                    Some(SyncAction::Push { path })
                }
            }

            (None, None, Some(_)) => Some(SyncAction::Forget { path }),
        };

        actions.extend(action);
    }

    pair_renames(actions, remote, local, state)
}

/// Fold a local disappearance and a local appearance with the same content
/// into a single rename
///
/// Candidates are paired in path order so the outcome is deterministic.
fn pair_renames(
    actions: Vec<SyncAction>,
    remote: &RemoteTree,
    local: &LocalSnapshot,
    state: &SyncState,
) -> Vec<SyncAction> {
    let mut used: HashSet<String> = HashSet::new();
    let mut renames = Vec::new();

    let appearances: Vec<&String> = actions
        .iter()
        .filter_map(|action| match action {
            SyncAction::Push { path } if !state.contains(path) && !remote.contains(path) => {
                Some(path)
            }
            _ => None,
        })
        .collect();

    for action in &actions {
        let SyncAction::DeleteRemote {
            path: from,
            verify: false,
        } = action
        else {
            continue;
        };
        let Some(record) = state.get(from) else {
            continue;
        };

        let partner = appearances.iter().find(|to| {
            !used.contains(to.as_str())
                && local
                    .get(to.as_str())
                    .map_or(false, |doc| doc.fingerprint == record.fingerprint)
        });

        if let Some(to) = partner {
            used.insert(from.clone());
            used.insert((*to).clone());
            renames.push(SyncAction::Rename {
                from: from.clone(),
                to: (*to).clone(),
            });
        }
    }

    renames.extend(actions.into_iter().filter(|action| match action {
        SyncAction::Push { path } | SyncAction::DeleteRemote { path, .. } => !used.contains(path),
        _ => true,
    }));
    renames
}
