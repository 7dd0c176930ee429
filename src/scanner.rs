use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::filter::DocumentFilter;
use crate::fingerprint::Fingerprint;

/// What the scanner knows about one local document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDocument {
    pub fingerprint: Fingerprint,
    pub size: u64,
    /// Filesystem modification time, when the platform reports one
    pub modified: Option<DateTime<Utc>>,
}

/// Every eligible local document, keyed by slash-separated relative path
///
/// Eligible files that exist but could not be taken in (unreadable, too
/// large, not UTF-8) are listed separately. They are still present on disk
/// and must never be mistaken for deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    documents: BTreeMap<String, LocalDocument>,
    unsyncable: BTreeMap<String, String>,
}

impl LocalSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: String, document: LocalDocument) {
        self.unsyncable.remove(&path);
        self.documents.insert(path, document);
    }

    /// Record a file that exists but cannot be synced, with the reason
    pub fn mark_unsyncable(&mut self, path: String, reason: String) {
        self.documents.remove(&path);
        self.unsyncable.insert(path, reason);
    }

    pub fn get(&self, path: &str) -> Option<&LocalDocument> {
        self.documents.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.documents.contains_key(path)
    }

    pub fn is_unsyncable(&self, path: &str) -> bool {
        self.unsyncable.contains_key(path)
    }

    /// Paths of syncable documents, in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.documents.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocalDocument)> {
        self.documents.iter()
    }

    /// Present but unsyncable paths with the reason each was skipped
    pub fn unsyncable(&self) -> impl Iterator<Item = (&String, &String)> {
        self.unsyncable.iter()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl std::ops::Index<&str> for LocalSnapshot {
    type Output = LocalDocument;

    fn index(&self, path: &str) -> &LocalDocument {
        &self.documents[path]
    }
}

impl IntoIterator for LocalSnapshot {
    type Item = (String, LocalDocument);
    type IntoIter = std::collections::btree_map::IntoIter<String, LocalDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

/// Current state of one relative path on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEntry {
    /// An eligible document, with its content
    Document { content: String, meta: LocalDocument },
    /// A directory exists at the path
    Directory,
    /// Nothing exists at the path
    Missing,
    /// An eligible document exists but cannot be synced (unreadable, too
    /// large, not UTF-8, not a regular file)
    Unsyncable { reason: String },
    /// Something exists but is not eligible for syncing
    Ignored,
}

/// Enumerate every eligible document under `root`
///
/// Hidden entries are not descended into. Files that vanish while the walk is
/// running are omitted silently; unreadable, oversized or non-UTF-8 files are
/// kept aside as unsyncable with a warning. A missing root is an error, never
/// an empty result.
pub fn scan(root: &Path, filter: &DocumentFilter) -> Result<LocalSnapshot> {
    scan_under(root, "", filter)
}

/// Enumerate eligible documents below the relative directory `prefix`
pub fn scan_under(root: &Path, prefix: &str, filter: &DocumentFilter) -> Result<LocalSnapshot> {
    if !root.is_dir() {
        bail!("Sync root does not exist or is not a directory: {}", root.display());
    }

    let start = absolute_path(root, prefix);
    let mut documents = LocalSnapshot::new();

    let walker = WalkDir::new(&start)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden_name(entry.file_name()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let vanished = e
                    .io_error()
                    .map_or(false, |io| io.kind() == ErrorKind::NotFound);
                if !vanished {
                    log::warn!("Skipping unreadable entry during scan: {e}");
                }
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let Some(rel) = relative_path(root, entry.path()) else {
            log::warn!("Skipping path with non UTF-8 name: {}", entry.path().display());
            continue;
        };

        if !filter.is_eligible(&rel) {
            continue;
        }

        match read_entry(root, &rel, filter)? {
            LocalEntry::Document { meta, .. } => documents.insert(rel, meta),
            LocalEntry::Unsyncable { reason } => documents.mark_unsyncable(rel, reason),
            _ => {}
        }
    }

    Ok(documents)
}

/// Inspect one relative path, reading and fingerprinting it if it is a document
pub fn read_entry(root: &Path, rel: &str, filter: &DocumentFilter) -> Result<LocalEntry> {
    let path = absolute_path(root, rel);

    let metadata = match fs::symlink_metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LocalEntry::Missing),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", path.display()));
        }
    };

    if metadata.is_dir() {
        return Ok(LocalEntry::Directory);
    }
    if !filter.is_eligible(rel) {
        return Ok(LocalEntry::Ignored);
    }
    if !metadata.is_file() {
        return Ok(unsyncable(rel, "not a regular file".to_string()));
    }
    if !filter.within_size_limit(metadata.len()) {
        return Ok(unsyncable(
            rel,
            format!(
                "{} bytes exceeds the {} byte limit",
                metadata.len(),
                filter.max_file_size_bytes
            ),
        ));
    }

    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LocalEntry::Missing),
        Err(e) => return Ok(unsyncable(rel, format!("unreadable: {e}"))),
    };

    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(_) => return Ok(unsyncable(rel, "content is not valid UTF-8".to_string())),
    };

    let meta = LocalDocument {
        fingerprint: Fingerprint::of(&content),
        size: content.len() as u64,
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    };

    Ok(LocalEntry::Document { content, meta })
}

fn unsyncable(rel: &str, reason: String) -> LocalEntry {
    log::warn!("Skipping {rel}: {reason}");
    LocalEntry::Unsyncable { reason }
}

/// Replace (or create) a local document without ever exposing a partial file
///
/// Content goes to a hidden temporary file next to the target, which is then
/// renamed over it. Parent folders are created as needed.
pub fn write_document(root: &Path, rel: &str, content: &str) -> Result<()> {
    let target = absolute_path(root, rel);
    let parent = target
        .parent()
        .with_context(|| format!("Document path has no parent: {rel}"))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create folder {}", parent.display()))?;

    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid document name: {rel}"))?;
    let temp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&temp)
            .with_context(|| format!("Failed to create {}", temp.display()))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp, &target)
            .with_context(|| format!("Failed to move document into place: {}", target.display()))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Remove a local document; an already-missing file is not an error
pub fn remove_document(root: &Path, rel: &str) -> Result<()> {
    let path = absolute_path(root, rel);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

/// Join a slash-separated relative path onto the root
pub fn absolute_path(root: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// Express `path` relative to `root` in slash form
///
/// Returns `None` for paths outside the root, the root itself, or names that
/// are not valid UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in stripped.components() {
        match component {
            Component::Normal(name) => segments.push(name.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .map_or(false, |n| n.starts_with('.') && n.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = absolute_path(root, rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_finds_nested_documents() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.md", b"alpha");
        write(temp.path(), "notes/b.md", b"beta");
        write(temp.path(), "notes/deep/c.md", b"gamma");
        write(temp.path(), "notes/image.png", b"\x89PNG");

        let snapshot = scan(temp.path(), &DocumentFilter::default()).unwrap();
        let paths: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(paths, vec!["a.md", "notes/b.md", "notes/deep/c.md"]);
        assert_eq!(snapshot["a.md"].fingerprint, Fingerprint::of("alpha"));
        assert_eq!(snapshot["notes/b.md"].size, 4);
        assert!(snapshot["a.md"].modified.is_some());
    }

    #[test]
    fn test_scan_skips_hidden_entries() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), ".obsidian/workspace.md", b"x");
        write(temp.path(), "notes/.draft.md", b"x");
        write(temp.path(), "notes/.a.md.1234.tmp", b"x");
        write(temp.path(), "notes/visible.md", b"x");

        let snapshot = scan(temp.path(), &DocumentFilter::default()).unwrap();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["notes/visible.md"]);
    }

    #[test]
    fn test_scan_omits_oversized_and_binary() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "big.md", &[b'x'; 64]);
        write(temp.path(), "binary.md", &[0xff, 0xfe, 0x00]);
        write(temp.path(), "ok.md", b"fine");

        let filter = DocumentFilter {
            max_file_size_bytes: 32,
            ..Default::default()
        };
        let snapshot = scan(temp.path(), &filter).unwrap();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["ok.md"]);

        // Still on disk, so kept aside rather than dropped
        let skipped: Vec<_> = snapshot.unsyncable().map(|(path, _)| path.as_str()).collect();
        assert_eq!(skipped, vec!["big.md", "binary.md"]);
        assert!(snapshot.is_unsyncable("binary.md"));
        assert!(!snapshot.contains("binary.md"));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone");
        assert!(scan(&missing, &DocumentFilter::default()).is_err());
    }

    #[test]
    fn test_scan_under_prefix() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "inbox/a.md", b"a");
        write(temp.path(), "inbox/sub/b.md", b"b");
        write(temp.path(), "other.md", b"c");

        let snapshot = scan_under(temp.path(), "inbox", &DocumentFilter::default()).unwrap();
        assert_eq!(
            snapshot.keys().collect::<Vec<_>>(),
            vec!["inbox/a.md", "inbox/sub/b.md"]
        );
    }

    #[test]
    fn test_read_entry_kinds() {
        let temp = TempDir::new().unwrap();
        let filter = DocumentFilter::default();
        write(temp.path(), "folder/a.md", b"hello");
        write(temp.path(), "folder/a.txt", b"hello");

        match read_entry(temp.path(), "folder/a.md", &filter).unwrap() {
            LocalEntry::Document { content, meta } => {
                assert_eq!(content, "hello");
                assert_eq!(meta.fingerprint, Fingerprint::of("hello"));
            }
            other => panic!("expected document, got {other:?}"),
        }
        assert_eq!(
            read_entry(temp.path(), "folder", &filter).unwrap(),
            LocalEntry::Directory
        );
        assert_eq!(
            read_entry(temp.path(), "folder/a.txt", &filter).unwrap(),
            LocalEntry::Ignored
        );
        assert_eq!(
            read_entry(temp.path(), "folder/missing.md", &filter).unwrap(),
            LocalEntry::Missing
        );

        write(temp.path(), "folder/latin1.md", b"caf\xe9");
        assert!(matches!(
            read_entry(temp.path(), "folder/latin1.md", &filter).unwrap(),
            LocalEntry::Unsyncable { .. }
        ));
    }

    #[test]
    fn test_write_document_creates_parents_and_replaces() {
        let temp = TempDir::new().unwrap();
        write_document(temp.path(), "new/folder/doc.md", "first").unwrap();
        write_document(temp.path(), "new/folder/doc.md", "second").unwrap();

        let path = temp.path().join("new").join("folder").join("doc.md");
        assert_eq!(fs::read_to_string(path).unwrap(), "second");

        // no temporary files left behind
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("new").join("folder"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_remove_document_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.md", b"x");
        remove_document(temp.path(), "a.md").unwrap();
        remove_document(temp.path(), "a.md").unwrap();
        assert!(!temp.path().join("a.md").exists());
    }

    #[test]
    fn test_relative_path_round_trip() {
        let root = Path::new("/data/notes");
        assert_eq!(
            relative_path(root, &absolute_path(root, "a/b/c.md")).as_deref(),
            Some("a/b/c.md")
        );
        assert_eq!(relative_path(root, root), None);
        assert_eq!(relative_path(root, Path::new("/elsewhere/x.md")), None);
    }
}
