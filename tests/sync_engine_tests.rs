use chrono::{Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use mdflare_sync::conflict::Side;
use mdflare_sync::filter::DocumentFilter;
use mdflare_sync::fingerprint::Fingerprint;
use mdflare_sync::quarantine::Quarantine;
use mdflare_sync::remote::{
    Document, MemoryRemote, RemoteError, RemoteResult, RemoteStore, RemoteTree, WriteConfirmation,
};
use mdflare_sync::sync::SyncEngine;

/// A temp root, an in-memory remote and an engine wired to both
struct Fixture {
    temp: TempDir,
    root: PathBuf,
    remote: Arc<MemoryRemote>,
    engine: SyncEngine,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let quarantine = Quarantine::new(temp.path().join("quarantine"));
        let engine = SyncEngine::new(remote.clone(), &root, DocumentFilter::default(), quarantine);
        Self {
            temp,
            root,
            remote,
            engine,
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root.join(rel)).ok()
    }

    fn remove(&self, rel: &str) {
        fs::remove_file(self.root.join(rel)).unwrap();
    }

    fn quarantine(&self) -> Quarantine {
        Quarantine::new(self.temp.path().join("quarantine"))
    }

    fn touched(&mut self, paths: &[&str]) -> mdflare_sync::report::SweepReport {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        self.engine.handle_touched(&paths)
    }

    /// Sweep, then confirm both sides agree and forget the calls made so far
    fn settle(&mut self) {
        let report = self.engine.sweep().unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        self.remote.reset_calls();
    }
}

fn names(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

#[test]
fn test_local_create_is_pushed() {
    let mut fx = Fixture::new();
    fx.write("notes/a.md", "hello");

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.pushed, names(&["notes/a.md"]));
    assert_eq!(fx.remote.content("notes/a.md").as_deref(), Some("hello"));
    assert_eq!(
        fx.engine.state().get("notes/a.md").unwrap().fingerprint,
        Fingerprint::of("hello")
    );
}

#[test]
fn test_remote_create_is_pulled() {
    let mut fx = Fixture::new();
    fx.remote.insert("b.md", "v1");
    fx.remote.insert("deep/er/c.md", "nested");

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.pulled, names(&["b.md", "deep/er/c.md"]));
    assert_eq!(fx.read("b.md").as_deref(), Some("v1"));
    assert_eq!(fx.read("deep/er/c.md").as_deref(), Some("nested"));
}

#[test]
fn test_second_sweep_makes_no_writes() {
    let mut fx = Fixture::new();
    fx.remote.insert("remote.md", "from the cloud");
    fx.write("local.md", "from this machine");
    fx.settle();

    let report = fx.engine.sweep().unwrap();

    let calls = fx.remote.calls();
    assert_eq!(calls.mutations(), 0);
    assert_eq!(calls.read, 0);
    assert_eq!(calls.list, 1);
    assert_eq!(report.change_count(), 0);
}

#[test]
fn test_first_contact_with_equal_content_adopts_without_writes() {
    let mut fx = Fixture::new();
    fx.remote.insert("same.md", "identical");
    fx.write("same.md", "identical");

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.adopted, names(&["same.md"]));
    assert_eq!(fx.remote.calls().mutations(), 0);
    assert!(fx.quarantine().list().unwrap().is_empty());
    assert!(fx.engine.state().contains("same.md"));
}

#[test]
fn test_one_sided_edits_converge_in_one_sweep() {
    let mut fx = Fixture::new();
    fx.write("local.md", "v1");
    fx.remote.insert("remote.md", "v1");
    fx.settle();

    fx.write("local.md", "v2 local");
    fx.remote.insert("remote.md", "v2 remote");

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.pushed, names(&["local.md"]));
    assert_eq!(report.pulled, names(&["remote.md"]));
    assert!(report.conflicts.is_empty());
    for (path, content) in [("local.md", "v2 local"), ("remote.md", "v2 remote")] {
        assert_eq!(fx.read(path).as_deref(), Some(content));
        assert_eq!(fx.remote.content(path).as_deref(), Some(content));
        assert_eq!(
            fx.engine.state().get(path).unwrap().fingerprint,
            Fingerprint::of(content)
        );
    }
}

#[test]
fn test_concurrent_edit_newer_remote_wins_and_local_is_quarantined() {
    let mut fx = Fixture::new();
    fx.write("c.md", "base");
    fx.settle();

    fx.write("c.md", "local edit");
    fx.remote
        .insert_at("c.md", "remote edit", Utc::now() + Duration::hours(1));

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].winner, Side::Remote);
    assert_eq!(fx.read("c.md").as_deref(), Some("remote edit"));
    assert_eq!(fx.remote.content("c.md").as_deref(), Some("remote edit"));

    let entries = fx.quarantine().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "c.md");
    assert_eq!(entries[0].side, Side::Local);
    assert_eq!(
        fs::read_to_string(entries[0].content_path()).unwrap(),
        "local edit"
    );

    // Resolved for good
    fx.remote.reset_calls();
    let report = fx.engine.sweep().unwrap();
    assert_eq!(report.change_count(), 0);
    assert_eq!(fx.remote.calls().mutations(), 0);
}

#[test]
fn test_concurrent_edit_newer_local_wins_and_remote_is_quarantined() {
    let mut fx = Fixture::new();
    fx.write("c.md", "base");
    fx.settle();

    fx.remote
        .insert_at("c.md", "old remote edit", Utc::now() - Duration::hours(1));
    fx.write("c.md", "fresh local edit");

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].winner, Side::Local);
    assert_eq!(
        fx.remote.content("c.md").as_deref(),
        Some("fresh local edit")
    );

    let entries = fx.quarantine().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].side, Side::Remote);
    assert_eq!(
        fs::read_to_string(entries[0].content_path()).unwrap(),
        "old remote edit"
    );
}

#[test]
fn test_conflict_is_not_applied_when_quarantine_fails() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    // A file where the quarantine folder should be
    let blocked = temp.path().join("quarantine");
    fs::write(&blocked, "not a folder").unwrap();

    let remote = Arc::new(MemoryRemote::new());
    let mut engine = SyncEngine::new(
        remote.clone(),
        &root,
        DocumentFilter::default(),
        Quarantine::new(&blocked),
    );

    fs::write(root.join("c.md"), "base").unwrap();
    engine.sweep().unwrap();

    fs::write(root.join("c.md"), "local edit").unwrap();
    remote.insert_at("c.md", "remote edit", Utc::now() + Duration::hours(1));

    let report = engine.sweep().unwrap();

    assert!(report.conflicts.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "c.md");
    assert_eq!(
        fs::read_to_string(root.join("c.md")).unwrap(),
        "local edit"
    );
    assert_eq!(remote.content("c.md").as_deref(), Some("remote edit"));
}

#[test]
fn test_local_delete_propagates() {
    let mut fx = Fixture::new();
    fx.write("gone.md", "bye");
    fx.write("kept.md", "stay");
    fx.settle();

    fx.remove("gone.md");
    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.deleted_remote, names(&["gone.md"]));
    assert_eq!(fx.remote.paths(), names(&["kept.md"]));
    assert!(!fx.engine.state().contains("gone.md"));
}

#[test]
fn test_remote_delete_propagates() {
    let mut fx = Fixture::new();
    fx.remote.insert("gone.md", "bye");
    fx.settle();

    fx.remote.remove("gone.md");
    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.deleted_local, names(&["gone.md"]));
    assert!(fx.read("gone.md").is_none());
}

#[test]
fn test_deleted_on_both_sides_makes_no_calls() {
    let mut fx = Fixture::new();
    fx.write("twice.md", "content");
    fx.settle();

    fx.remove("twice.md");
    fx.remote.remove("twice.md");
    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.change_count(), 0);
    let calls = fx.remote.calls();
    assert_eq!(calls.mutations(), 0);
    assert_eq!(calls.read, 0);
    assert!(fx.engine.state().is_empty());
}

#[test]
fn test_remote_edit_beats_local_delete() {
    let mut fx = Fixture::new();
    fx.write("a.md", "v1");
    fx.settle();

    fx.remove("a.md");
    fx.remote.insert("a.md", "v2");
    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.pulled, names(&["a.md"]));
    assert_eq!(fx.read("a.md").as_deref(), Some("v2"));
    assert_eq!(fx.remote.calls().delete, 0);
}

#[test]
fn test_local_edit_beats_remote_delete() {
    let mut fx = Fixture::new();
    fx.remote.insert("a.md", "v1");
    fx.settle();

    fx.remote.remove("a.md");
    fx.write("a.md", "v2");
    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.pushed, names(&["a.md"]));
    assert_eq!(fx.remote.content("a.md").as_deref(), Some("v2"));
}

#[test]
fn test_local_move_becomes_one_rename() {
    let mut fx = Fixture::new();
    fx.write("old.md", "moving content");
    fx.settle();

    fs::create_dir_all(fx.root.join("sub")).unwrap();
    fs::rename(fx.root.join("old.md"), fx.root.join("sub/new.md")).unwrap();
    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.renamed.len(), 1);
    assert_eq!(report.renamed[0].from, "old.md");
    assert_eq!(report.renamed[0].to, "sub/new.md");
    let calls = fx.remote.calls();
    assert_eq!((calls.rename, calls.write, calls.delete), (1, 0, 0));
    assert_eq!(fx.remote.paths(), names(&["sub/new.md"]));

    fx.remote.reset_calls();
    fx.engine.sweep().unwrap();
    assert_eq!(fx.remote.calls().mutations(), 0);
}

#[test]
fn test_ineligible_local_files_are_left_alone() {
    let mut fx = Fixture::new();
    fx.write("notes.txt", "plain text");
    fx.write(".hidden.md", "hidden");
    fx.write(".obsidian/workspace.md", "tool state");
    fx.write("real.md", "synced");

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.pushed, names(&["real.md"]));
    assert_eq!(fx.remote.paths(), names(&["real.md"]));
}

#[test]
fn test_unreadable_local_document_is_never_deleted_remotely() {
    let mut fx = Fixture::new();
    fx.write("a.md", "hello");
    fx.settle();

    // Re-saved in a legacy encoding
    fs::write(fx.root.join("a.md"), b"caf\xe9").unwrap();

    let report = fx.engine.sweep().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "a.md");
    assert!(report.deleted_remote.is_empty());
    assert_eq!(fx.remote.content("a.md").as_deref(), Some("hello"));
    assert_eq!(fx.remote.calls().mutations(), 0);
    assert!(fx.root.join("a.md").exists());

    let report = fx.touched(&["a.md"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(fx.remote.calls().delete, 0);
    assert_eq!(fx.remote.content("a.md").as_deref(), Some("hello"));

    // Readable again: synced as an ordinary edit
    fx.write("a.md", "café");
    let report = fx.engine.sweep().unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.pushed, names(&["a.md"]));
    assert_eq!(fx.remote.content("a.md").as_deref(), Some("café"));
}

#[test]
fn test_oversized_local_document_keeps_remote_copy() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let filter = DocumentFilter {
        max_file_size_bytes: 16,
        ..Default::default()
    };
    let mut engine = SyncEngine::new(
        remote.clone(),
        &root,
        filter,
        Quarantine::new(temp.path().join("quarantine")),
    );

    fs::write(root.join("a.md"), "short").unwrap();
    engine.sweep().unwrap();
    fs::write(root.join("a.md"), "x".repeat(64)).unwrap();

    let report = engine.sweep().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(remote.content("a.md").as_deref(), Some("short"));
    assert!(engine.state().contains("a.md"));
}

#[test]
fn test_touched_push_quarantines_concurrent_remote_edit() {
    let mut fx = Fixture::new();
    fx.write("c.md", "base");
    fx.settle();

    // Edited in the browser after the last sweep, then locally
    fx.remote.insert_at(
        "c.md",
        "remote edit from browser",
        Utc::now() - Duration::hours(1),
    );
    fx.write("c.md", "local edit");

    let report = fx.touched(&["c.md"]);

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].winner, Side::Local);
    assert_eq!(fx.remote.content("c.md").as_deref(), Some("local edit"));

    let entries = fx.quarantine().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].side, Side::Remote);
    assert_eq!(
        fs::read_to_string(entries[0].content_path()).unwrap(),
        "remote edit from browser"
    );

    fx.remote.reset_calls();
    let report = fx.engine.sweep().unwrap();
    assert_eq!(report.change_count(), 0);
    assert_eq!(fx.remote.calls().mutations(), 0);
}

#[test]
fn test_touched_push_keeps_newer_remote_edit() {
    let mut fx = Fixture::new();
    fx.write("c.md", "base");
    fx.settle();

    fx.write("c.md", "local edit");
    fx.remote
        .insert_at("c.md", "remote edit", Utc::now() + Duration::hours(1));

    let report = fx.touched(&["c.md"]);

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].winner, Side::Remote);
    assert_eq!(fx.read("c.md").as_deref(), Some("remote edit"));
    assert_eq!(fx.remote.calls().write, 0);

    let entries = fx.quarantine().list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].side, Side::Local);
}

#[test]
fn test_touched_write_pushes_once() {
    let mut fx = Fixture::new();
    fx.write("n.md", "draft");

    let report = fx.touched(&["n.md", "n.md"]);
    assert_eq!(report.pushed, names(&["n.md"]));
    assert_eq!(fx.remote.calls().write, 1);

    // Already recorded: nothing to send
    let report = fx.touched(&["n.md"]);
    assert_eq!(report.change_count(), 0);
    assert_eq!(fx.remote.calls().write, 1);
}

#[test]
fn test_touched_delete_only_removes_tracked_documents() {
    let mut fx = Fixture::new();
    fx.write("d.md", "tracked");
    fx.settle();
    fx.remote.insert("remote-only.md", "never seen locally");

    fx.remove("d.md");
    let report = fx.touched(&["d.md", "remote-only.md"]);

    assert_eq!(report.deleted_remote, names(&["d.md"]));
    assert_eq!(fx.remote.paths(), names(&["remote-only.md"]));
    assert_eq!(fx.remote.calls().delete, 1);
}

#[test]
fn test_touched_rename_within_batch() {
    let mut fx = Fixture::new();
    fx.write("a.md", "same body");
    fx.settle();

    fs::rename(fx.root.join("a.md"), fx.root.join("b.md")).unwrap();
    let report = fx.touched(&["a.md", "b.md"]);

    assert_eq!(report.renamed.len(), 1);
    let calls = fx.remote.calls();
    assert_eq!((calls.rename, calls.write, calls.delete), (1, 0, 0));
    assert_eq!(fx.remote.paths(), names(&["b.md"]));
    assert!(fx.engine.state().contains("b.md"));
    assert!(!fx.engine.state().contains("a.md"));
}

#[test]
fn test_touched_new_folder_pushes_its_documents() {
    let mut fx = Fixture::new();
    fx.write("inbox/one.md", "1");
    fx.write("inbox/nested/two.md", "2");

    let report = fx.touched(&["inbox"]);

    assert_eq!(report.pushed, names(&["inbox/nested/two.md", "inbox/one.md"]));
    assert_eq!(fx.remote.content("inbox/one.md").as_deref(), Some("1"));
}

#[test]
fn test_vanished_folder_uses_recursive_delete() {
    let mut fx = Fixture::new();
    fx.write("dir/x.md", "x");
    fx.write("dir/sub/y.md", "y");
    fx.write("outside.md", "stays");
    fx.settle();

    fs::remove_dir_all(fx.root.join("dir")).unwrap();
    let report = fx.touched(&["dir"]);

    assert_eq!(report.deleted_remote.len(), 2);
    assert_eq!(fx.remote.calls().delete, 1);
    assert_eq!(fx.remote.paths(), names(&["outside.md"]));
    assert!(fx.engine.state().paths_under("dir").is_empty());
}

#[test]
fn test_vanished_folder_spares_untracked_remote_documents() {
    let mut fx = Fixture::new();
    fx.write("dir/x.md", "x");
    fx.write("dir/y.md", "y");
    fx.settle();
    fx.remote.insert("dir/from-elsewhere.md", "not ours to delete");

    fs::remove_dir_all(fx.root.join("dir")).unwrap();
    let report = fx.touched(&["dir"]);

    assert_eq!(report.deleted_remote, names(&["dir/x.md", "dir/y.md"]));
    assert_eq!(fx.remote.calls().delete, 2);
    assert_eq!(fx.remote.paths(), names(&["dir/from-elsewhere.md"]));
}

#[test]
fn test_moved_folder_becomes_renames() {
    let mut fx = Fixture::new();
    fx.write("draft/a.md", "alpha");
    fx.write("draft/b.md", "beta");
    fx.settle();

    fs::rename(fx.root.join("draft"), fx.root.join("final")).unwrap();
    let report = fx.touched(&["draft", "final"]);

    assert_eq!(report.renamed.len(), 2);
    let calls = fx.remote.calls();
    assert_eq!((calls.rename, calls.write, calls.delete), (2, 0, 0));
    assert_eq!(fx.remote.paths(), names(&["final/a.md", "final/b.md"]));
}

#[test]
fn test_auth_failure_stops_the_sweep() {
    let mut fx = Fixture::new();
    fx.write("a.md", "first");
    fx.write("b.md", "second");
    fx.remote
        .fail_next("a.md", RemoteError::AuthRequired("token revoked".into()));

    let report = fx.engine.sweep().unwrap();

    assert!(report.auth_required);
    assert!(report.failures.is_empty());
    assert!(fx.remote.paths().is_empty());
    assert_eq!(fx.remote.calls().write, 1);

    // Credentials restored: the same sweep goes through
    let report = fx.engine.sweep().unwrap();
    assert!(!report.auth_required);
    assert_eq!(report.pushed, names(&["a.md", "b.md"]));
}

#[test]
fn test_auth_failure_on_listing_is_reported_not_raised() {
    let mut fx = Fixture::new();
    fx.remote
        .fail_next_call(RemoteError::AuthRequired("expired".into()));

    let report = fx.engine.sweep().unwrap();

    assert!(report.auth_required);
    assert!(!report.is_clean());
}

#[test]
fn test_listing_failure_aborts_the_sweep() {
    let mut fx = Fixture::new();
    fx.remote
        .fail_next_call(RemoteError::Transient("503".into()));

    assert!(fx.engine.sweep().is_err());
}

#[test]
fn test_path_failure_does_not_block_others() {
    let mut fx = Fixture::new();
    fx.write("a.md", "a");
    fx.write("b.md", "b");
    fx.remote
        .fail_next("a.md", RemoteError::Transient("connection reset".into()));

    let report = fx.engine.sweep().unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "a.md");
    assert_eq!(report.pushed, names(&["b.md"]));
    assert!(!fx.engine.state().contains("a.md"));

    let report = fx.engine.sweep().unwrap();
    assert_eq!(report.pushed, names(&["a.md"]));
    assert!(report.is_clean());
}

#[test]
fn test_missing_root_is_an_error() {
    let mut fx = Fixture::new();
    fs::remove_dir_all(&fx.root).unwrap();

    assert!(fx.engine.sweep().is_err());
    assert_eq!(fx.remote.calls().list, 0);
}

/// Remote that simulates a local edit landing while a read is in flight
struct EditDuringRead {
    inner: MemoryRemote,
    target: PathBuf,
    armed: AtomicBool,
}

impl RemoteStore for EditDuringRead {
    fn list(&self) -> RemoteResult<RemoteTree> {
        self.inner.list()
    }

    fn read(&self, path: &str) -> RemoteResult<Document> {
        if self.armed.swap(false, Ordering::SeqCst) {
            fs::write(&self.target, "typed during the sweep").unwrap();
        }
        self.inner.read(path)
    }

    fn write(&self, path: &str, content: &str) -> RemoteResult<WriteConfirmation> {
        self.inner.write(path, content)
    }

    fn delete(&self, path: &str, recursive: bool) -> RemoteResult<Option<u64>> {
        self.inner.delete(path, recursive)
    }
}

fn engine_with(remote: Arc<EditDuringRead>, root: &Path, quarantine: &Path) -> SyncEngine {
    SyncEngine::new(
        remote,
        root,
        DocumentFilter::default(),
        Quarantine::new(quarantine),
    )
}

#[test]
fn test_local_edit_during_pull_is_never_overwritten() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("docs");
    fs::create_dir_all(&root).unwrap();
    let target = root.join("a.md");

    let remote = Arc::new(EditDuringRead {
        inner: MemoryRemote::new(),
        target: target.clone(),
        armed: AtomicBool::new(false),
    });
    let mut engine = engine_with(remote.clone(), &root, &temp.path().join("q"));

    fs::write(&target, "v1").unwrap();
    engine.sweep().unwrap();

    remote.inner.insert("a.md", "remote v2");
    remote.armed.store(true, Ordering::SeqCst);
    let report = engine.sweep().unwrap();

    assert!(report.pulled.is_empty());
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "typed during the sweep"
    );

    // The next sweep sees both edits and keeps the loser in quarantine
    let report = engine.sweep().unwrap();
    assert_eq!(report.conflicts.len(), 1);
    let quarantined = Quarantine::new(temp.path().join("q")).list().unwrap();
    assert_eq!(quarantined.len(), 1);
}
