use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::plan::{plan, SyncAction};
use super::state::SyncState;
use crate::conflict::{self, Conflict, Side, Version};
use crate::filter::DocumentFilter;
use crate::fingerprint::Fingerprint;
use crate::quarantine::Quarantine;
use crate::remote::{Document, RemoteError, RemoteStamp, RemoteStore};
use crate::report::{PassKind, RenamedPath, SweepReport};
use crate::scanner::{self, LocalDocument, LocalEntry, LocalSnapshot};

/// True if the error, or anything it wraps, is an authentication failure
pub fn is_auth_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<RemoteError>().map_or(false, RemoteError::is_auth))
}

/// One remote operation of an incremental pass, in execution order
enum TouchedStep {
    Rename {
        from: String,
        to: String,
    },
    Write(String),
    Delete(String),
    DeleteFolder(String),
}

/// Keeps one local root and one remote account consistent
///
/// The engine owns the [`SyncState`] and is driven from a single thread: every
/// method takes `&mut self`, so remote calls for the same path can never
/// overlap. State is only written after the remote or local write it
/// describes succeeded.
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    root: PathBuf,
    filter: DocumentFilter,
    quarantine: Quarantine,
    state: SyncState,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        root: impl Into<PathBuf>,
        filter: DocumentFilter,
        quarantine: Quarantine,
    ) -> Self {
        Self {
            remote,
            root: root.into(),
            filter,
            quarantine,
            state: SyncState::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Swap the remote client, e.g. after the token was refreshed
    pub fn set_remote(&mut self, remote: Arc<dyn RemoteStore>) {
        self.remote = remote;
    }

    /// Full three-way reconciliation of the remote listing, the local tree
    /// and the sync state
    ///
    /// Returns an error only when the sweep could not run at all (unreadable
    /// root, failed listing). Per-path failures are collected in the report
    /// and leave that path's record untouched. An authentication failure
    /// stops the sweep and is flagged on the report.
    pub fn sweep(&mut self) -> Result<SweepReport> {
        let mut report = SweepReport::new(PassKind::Sweep);

        let local = scanner::scan(&self.root, &self.filter)?;

        let mut remote = match self.remote.list() {
            Ok(tree) => tree,
            Err(err) if err.is_auth() => {
                log::warn!("Remote rejected credentials: {err}");
                report.auth_required = true;
                return Ok(report.finish());
            }
            Err(err) => return Err(err).context("Failed to list remote documents"),
        };
        remote.retain(|path| self.filter.is_eligible(path));

        for (path, reason) in local.unsyncable() {
            if remote.contains(path) || self.state.contains(path) {
                report.fail(path.as_str(), &anyhow!("Cannot sync {path}: {reason}"));
            }
        }

        let actions = plan(&remote, &local, &self.state);
        log::debug!(
            "Sweep: {} remote, {} local, {} tracked, {} actions",
            remote.len(),
            local.len(),
            self.state.len(),
            actions.len()
        );

        for action in actions {
            let path = action.path().to_string();
            if let Err(err) = self.apply(action, &local, &mut report) {
                if is_auth_error(&err) {
                    log::warn!("Remote rejected credentials, stopping sweep: {err:#}");
                    report.auth_required = true;
                    break;
                }
                report.fail(path, &err);
            }
        }

        Ok(report.finish())
    }

    fn apply(
        &mut self,
        action: SyncAction,
        local: &LocalSnapshot,
        report: &mut SweepReport,
    ) -> Result<()> {
        match action {
            SyncAction::Pull { path } => {
                let expected = local.get(&path).map(|doc| doc.fingerprint.clone());
                self.pull(&path, expected.as_ref(), report)
            }
            SyncAction::Push { path } => self.push(&path, report),
            SyncAction::Resolve { path } => self.resolve(&path, report),
            SyncAction::DeleteLocal { path } => self.delete_local(&path, report),
            SyncAction::DeleteRemote { path, verify } => self.delete_remote(&path, verify, report),
            SyncAction::Rename { from, to } => self.rename(&from, &to, report),
            SyncAction::Forget { path } => {
                log::debug!("{path} is gone on both sides");
                self.state.forget(&path);
                Ok(())
            }
        }
    }

    /// Read the current local document, or `None` if there is none
    ///
    /// A file that exists but cannot be read as a document is an error, so
    /// it is never taken for a deletion or overwritten.
    fn read_local(&self, path: &str) -> Result<Option<(String, LocalDocument)>> {
        match scanner::read_entry(&self.root, path, &self.filter)? {
            LocalEntry::Document { content, meta } => Ok(Some((content, meta))),
            LocalEntry::Unsyncable { reason } => bail!("Cannot sync {path}: {reason}"),
            LocalEntry::Directory | LocalEntry::Missing | LocalEntry::Ignored => Ok(None),
        }
    }

    /// True only if nothing at all exists at `path` locally
    fn is_missing_locally(&self, path: &str) -> Result<bool> {
        match scanner::read_entry(&self.root, path, &self.filter)? {
            LocalEntry::Missing => Ok(true),
            LocalEntry::Unsyncable { reason } => bail!("Cannot sync {path}: {reason}"),
            _ => Ok(false),
        }
    }

    fn current_fingerprint(&self, path: &str) -> Result<Option<Fingerprint>> {
        Ok(self.read_local(path)?.map(|(_, meta)| meta.fingerprint))
    }

    /// Write the remote version locally
    ///
    /// `expected` is the local fingerprint the decision was based on (`None`
    /// for absent). If the file changed since, the path is left for the next
    /// pass instead of overwriting an edit nobody has seen.
    fn pull(
        &mut self,
        path: &str,
        expected: Option<&Fingerprint>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let document = match self.remote.read(path) {
            Ok(document) => document,
            Err(err) if err.is_not_found() => {
                log::debug!("{path} disappeared remotely before it could be pulled");
                return Ok(());
            }
            Err(err) => return Err(err).with_context(|| format!("Failed to read {path}")),
        };
        self.apply_remote_version(path, document, expected, report)
    }

    fn apply_remote_version(
        &mut self,
        path: &str,
        document: Document,
        expected: Option<&Fingerprint>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let remote_fp = Fingerprint::of(&document.content);
        let current = self.current_fingerprint(path)?;

        if current.as_ref() != expected {
            log::info!("{path} changed locally during the sweep, deferring");
            return Ok(());
        }

        if current.as_ref() == Some(&remote_fp) {
            // Same content on both sides; only the stamp is new
            self.state.record(path, remote_fp, document.stamp());
            report.adopted.push(path.to_string());
            return Ok(());
        }

        scanner::write_document(&self.root, path, &document.content)?;
        log::info!("Pulled {path}");
        self.state.record(path, remote_fp, document.stamp());
        report.pulled.push(path.to_string());
        Ok(())
    }

    /// Write the local version remotely
    fn push(&mut self, path: &str, report: &mut SweepReport) -> Result<()> {
        let Some((content, meta)) = self.read_local(path)? else {
            log::debug!("{path} vanished locally before it could be pushed");
            return Ok(());
        };
        self.write_remote(path, &content, meta.fingerprint, report)
    }

    fn write_remote(
        &mut self,
        path: &str,
        content: &str,
        fingerprint: Fingerprint,
        report: &mut SweepReport,
    ) -> Result<()> {
        let confirmation = self
            .remote
            .write(path, content)
            .with_context(|| format!("Failed to write {path}"))?;
        log::info!("Pushed {path}");
        self.state.record(path, fingerprint, confirmation.stamp());
        report.pushed.push(path.to_string());
        Ok(())
    }

    /// Settle a path from the actual content on both sides
    ///
    /// Used when the listings alone cannot tell which side moved, and for
    /// every local change pushed outside a sweep.
    fn resolve(&mut self, path: &str, report: &mut SweepReport) -> Result<()> {
        let document = match self.remote.read(path) {
            Ok(document) => document,
            Err(err) if err.is_not_found() => return self.push(path, report),
            Err(err) => return Err(err).with_context(|| format!("Failed to read {path}")),
        };
        let Some((local_content, local_meta)) = self.read_local(path)? else {
            log::info!("{path} vanished locally during the sweep, deferring");
            return Ok(());
        };

        let remote_fp = Fingerprint::of(&document.content);
        let local_fp = local_meta.fingerprint.clone();

        if remote_fp == local_fp {
            self.state.record(path, remote_fp, document.stamp());
            report.adopted.push(path.to_string());
            return Ok(());
        }

        // With a record, content tells which side really moved
        if let Some(record) = self.state.get(path) {
            if record.fingerprint == remote_fp {
                return self.write_remote(path, &local_content, local_fp, report);
            }
            if record.fingerprint == local_fp {
                return self.apply_remote_version(path, document, Some(&local_fp), report);
            }
        }

        self.resolve_conflict(path, document, local_content, local_meta, report)
    }

    fn resolve_conflict(
        &mut self,
        path: &str,
        document: Document,
        local_content: String,
        local_meta: LocalDocument,
        report: &mut SweepReport,
    ) -> Result<()> {
        let remote_fp = Fingerprint::of(&document.content);
        let local_fp = local_meta.fingerprint.clone();

        let (winner, resolution) = conflict::decide(
            Version {
                fingerprint: &local_fp,
                modified: local_meta.modified,
            },
            Version {
                fingerprint: &remote_fp,
                modified: document.modified,
            },
        );

        // The loser goes to quarantine first; if that fails, nothing is overwritten
        let quarantined = match winner {
            Side::Local => self
                .quarantine
                .store(path, Side::Remote, &document.content, &remote_fp),
            Side::Remote => self
                .quarantine
                .store(path, Side::Local, &local_content, &local_fp),
        }
        .with_context(|| format!("Refusing to resolve {path}: could not quarantine the losing version"))?;

        match winner {
            Side::Local => {
                let confirmation = self
                    .remote
                    .write(path, &local_content)
                    .with_context(|| format!("Failed to write {path}"))?;
                self.state
                    .record(path, local_fp.clone(), confirmation.stamp());
            }
            Side::Remote => {
                scanner::write_document(&self.root, path, &document.content)?;
                self.state
                    .record(path, remote_fp.clone(), document.stamp());
            }
        }

        log::warn!(
            "Conflict on {path}: kept {winner} version, {} version saved to {}",
            winner.other(),
            quarantined.display()
        );
        report.conflicts.push(Conflict {
            path: path.to_string(),
            winner,
            resolution,
            local_fingerprint: local_fp,
            remote_fingerprint: remote_fp,
            local_modified: local_meta.modified,
            remote_modified: document.modified,
            quarantined,
        });
        Ok(())
    }

    /// Deleted remotely, unchanged locally
    fn delete_local(&mut self, path: &str, report: &mut SweepReport) -> Result<()> {
        let recorded = self.state.get(path).map(|r| r.fingerprint.clone());
        if self.current_fingerprint(path)? != recorded {
            log::info!("{path} changed locally during the sweep, deferring");
            return Ok(());
        }

        scanner::remove_document(&self.root, path)?;
        log::info!("Deleted {path} locally (removed remotely)");
        self.state.forget(path);
        report.deleted_local.push(path.to_string());
        Ok(())
    }

    /// Deleted locally; the remote copy goes too unless it was edited
    fn delete_remote(&mut self, path: &str, verify: bool, report: &mut SweepReport) -> Result<()> {
        if !self.is_missing_locally(path)? {
            log::info!("{path} reappeared locally during the sweep, deferring");
            return Ok(());
        }

        if verify {
            let recorded = self.state.get(path).map(|r| r.fingerprint.clone());
            match self.remote.read(path) {
                Ok(document) => {
                    if Some(Fingerprint::of(&document.content)) != recorded {
                        // Edited remotely after the last agreement: the edit wins
                        return self.apply_remote_version(path, document, None, report);
                    }
                }
                Err(err) if err.is_not_found() => {
                    self.state.forget(path);
                    return Ok(());
                }
                Err(err) => return Err(err).with_context(|| format!("Failed to read {path}")),
            }
        }

        self.remove_remote(path)?;
        log::info!("Deleted {path} remotely (removed locally)");
        self.state.forget(path);
        report.deleted_remote.push(path.to_string());
        Ok(())
    }

    fn remove_remote(&self, path: &str) -> Result<()> {
        match self.remote.delete(path, false) {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to delete {path}")),
        }
    }

    /// A tracked document moved locally without changing
    fn rename(&mut self, from: &str, to: &str, report: &mut SweepReport) -> Result<()> {
        let Some(recorded) = self.state.get(from).map(|r| r.fingerprint.clone()) else {
            return Ok(());
        };
        let still_moved = self.is_missing_locally(from)?
            && self.current_fingerprint(to)?.as_ref() == Some(&recorded);
        if !still_moved {
            log::info!("{from} -> {to} no longer looks like a move, deferring");
            return Ok(());
        }

        let size = scanner::absolute_path(&self.root, to)
            .metadata()
            .map(|m| m.len())
            .ok();
        let confirmation = self
            .remote
            .rename(from, to)
            .with_context(|| format!("Failed to rename {from} to {to}"))?;

        let stamp = confirmation
            .map(|c| c.stamp())
            .unwrap_or(RemoteStamp {
                size,
                modified: None,
            });
        log::info!("Renamed {from} -> {to}");
        self.state.forget(from);
        self.state.record(to, recorded, stamp);
        report.renamed.push(RenamedPath {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    /// Propagate settled local changes for a batch of watched paths
    ///
    /// Existing documents whose content differs from the record are
    /// compared with the current remote version first: if the remote moved
    /// on since the record was taken, the conflict policy decides and the
    /// loser is quarantined; otherwise the local version is pushed. A
    /// missing path with a record is deleted remotely; a missing path
    /// without one is left alone, so a document that only exists remotely
    /// is never removed. A vanished folder removes every tracked document
    /// under it.
    pub fn handle_touched(&mut self, paths: &[String]) -> SweepReport {
        let mut report = SweepReport::new(PassKind::Touched);

        let mut appeared: BTreeMap<String, Fingerprint> = BTreeMap::new();
        let mut vanished: BTreeSet<String> = BTreeSet::new();
        let mut vanished_dirs: BTreeSet<String> = BTreeSet::new();

        let unique: BTreeSet<&String> = paths.iter().collect();
        for path in unique {
            if !self.filter.is_candidate(path) {
                continue;
            }
            if let Err(err) =
                self.classify_touched(path, &mut appeared, &mut vanished, &mut vanished_dirs)
            {
                report.fail(path.as_str(), &err);
            }
        }

        // Moves within the batch, including documents of vanished folders
        let mut disappeared: BTreeSet<String> = vanished.clone();
        for dir in &vanished_dirs {
            disappeared.extend(self.state.paths_under(dir));
        }

        let mut renames = Vec::new();
        for from in disappeared {
            let Some(recorded) = self.state.get(&from).map(|r| r.fingerprint.clone()) else {
                continue;
            };
            let partner = appeared
                .iter()
                .find(|(to, fp)| **fp == recorded && !self.state.contains(to))
                .map(|(to, _)| to.clone());
            if let Some(to) = partner {
                appeared.remove(&to);
                vanished.remove(&from);
                renames.push((from, to));
            }
        }

        let steps = renames
            .into_iter()
            .map(|(from, to)| TouchedStep::Rename { from, to })
            .chain(appeared.into_keys().map(TouchedStep::Write))
            .chain(vanished.into_iter().map(TouchedStep::Delete))
            .chain(vanished_dirs.into_iter().map(TouchedStep::DeleteFolder));

        for step in steps {
            let (path, result) = match step {
                TouchedStep::Rename { from, to } => {
                    let result = self.rename(&from, &to, &mut report);
                    (to, result)
                }
                TouchedStep::Write(path) => {
                    let result = self.resolve(&path, &mut report);
                    (path, result)
                }
                TouchedStep::Delete(path) => {
                    let result = self.delete_tracked(&path, &mut report);
                    (path, result)
                }
                TouchedStep::DeleteFolder(prefix) => {
                    let result = self.delete_folder(&prefix, &mut report);
                    (prefix, result)
                }
            };

            match result {
                Ok(()) => {}
                Err(err) if is_auth_error(&err) => {
                    log::warn!("Remote rejected credentials, pausing: {err:#}");
                    report.auth_required = true;
                    break;
                }
                Err(err) => report.fail(path, &err),
            }
        }

        report.finish()
    }

    fn classify_touched(
        &self,
        path: &str,
        appeared: &mut BTreeMap<String, Fingerprint>,
        vanished: &mut BTreeSet<String>,
        vanished_dirs: &mut BTreeSet<String>,
    ) -> Result<()> {
        match scanner::read_entry(&self.root, path, &self.filter)? {
            LocalEntry::Document { meta, .. } => {
                let unchanged = self
                    .state
                    .get(path)
                    .map_or(false, |r| r.fingerprint == meta.fingerprint);
                if !unchanged {
                    appeared.insert(path.to_string(), meta.fingerprint);
                }
            }
            LocalEntry::Directory => {
                // A folder moved or copied in; its files may not have been
                // reported one by one
                for (rel, meta) in scanner::scan_under(&self.root, path, &self.filter)? {
                    let unchanged = self
                        .state
                        .get(&rel)
                        .map_or(false, |r| r.fingerprint == meta.fingerprint);
                    if !unchanged {
                        appeared.entry(rel).or_insert(meta.fingerprint);
                    }
                }
            }
            LocalEntry::Missing => {
                if self.state.contains(path) {
                    vanished.insert(path.to_string());
                } else if !self.state.paths_under(path).is_empty() {
                    vanished_dirs.insert(path.to_string());
                }
            }
            LocalEntry::Unsyncable { reason } => {
                if self.state.contains(path) {
                    bail!("Cannot sync {path}: {reason}");
                }
            }
            LocalEntry::Ignored => {}
        }
        Ok(())
    }

    fn delete_tracked(&mut self, path: &str, report: &mut SweepReport) -> Result<()> {
        if !self.is_missing_locally(path)? {
            log::info!("{path} reappeared locally, deferring");
            return Ok(());
        }
        self.remove_remote(path)?;
        log::info!("Deleted {path} remotely (removed locally)");
        self.state.forget(path);
        report.deleted_remote.push(path.to_string());
        Ok(())
    }

    /// Delete what is left of a vanished folder's tracked documents
    ///
    /// One recursive delete is used when the remote folder holds nothing but
    /// documents this engine tracks; otherwise each one is deleted on its own
    /// so untracked remote documents survive.
    fn delete_folder(&mut self, prefix: &str, report: &mut SweepReport) -> Result<()> {
        let tracked: Vec<String> = self
            .state
            .paths_under(prefix)
            .into_iter()
            .filter(|path| !scanner::absolute_path(&self.root, path).exists())
            .collect();
        if tracked.is_empty() {
            return Ok(());
        }

        let listing = self
            .remote
            .list()
            .context("Failed to list remote documents")?;
        let tracked_set: HashSet<&String> = tracked.iter().collect();
        let only_tracked = listing
            .paths_under(prefix)
            .all(|path| tracked_set.contains(path));
        let all_tracked_gone = self.state.paths_under(prefix).len() == tracked.len();

        if only_tracked && all_tracked_gone {
            match self.remote.delete(prefix, true) {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("Failed to delete folder {prefix}"))
                }
            }
            log::info!("Deleted folder {prefix} remotely ({} documents)", tracked.len());
            for path in tracked {
                self.state.forget(&path);
                report.deleted_remote.push(path);
            }
            return Ok(());
        }

        for path in tracked {
            match self.remove_remote(&path) {
                Ok(()) => {
                    self.state.forget(&path);
                    report.deleted_remote.push(path);
                }
                Err(err) if is_auth_error(&err) => return Err(err),
                Err(err) => report.fail(path, &err),
            }
        }
        Ok(())
    }
}
