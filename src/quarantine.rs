use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::conflict::Side;
use crate::fingerprint::Fingerprint;
use crate::scanner::{absolute_path, write_document};

/// Name of the manifest stored in every entry folder
const MANIFEST: &str = "entry.json";

/// Manifest describing one quarantined version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub id: String,
    /// Relative path of the document the version belonged to
    pub path: String,
    /// The side that lost the conflict
    pub side: Side,
    pub fingerprint: Fingerprint,
    pub quarantined_at: DateTime<Utc>,
    /// Folder holding the manifest and the saved copy
    #[serde(skip)]
    pub location: PathBuf,
}

impl QuarantineEntry {
    /// Full path of the saved copy
    pub fn content_path(&self) -> PathBuf {
        absolute_path(&self.location, &self.path)
    }
}

/// Drop box for versions that lost a conflict
///
/// Each version lands in its own folder `<dir>/<timestamp>-<id>/`, holding the
/// document at its original relative path plus an `entry.json` manifest.
/// Nothing in here is ever read back by the sync engine.
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably save a losing version before it is overwritten
    ///
    /// Returns the path of the saved copy. Any error means nothing was saved
    /// and the caller must not overwrite the version.
    pub fn store(
        &self,
        path: &str,
        side: Side,
        content: &str,
        fingerprint: &Fingerprint,
    ) -> Result<PathBuf> {
        let now = Utc::now();
        let id = Uuid::new_v4().simple().to_string();
        let location = self
            .dir
            .join(format!("{}-{}", now.format("%Y%m%dT%H%M%S%.3fZ"), &id[..8]));

        fs::create_dir_all(&location).with_context(|| {
            format!("Failed to create quarantine folder {}", location.display())
        })?;

        let entry = QuarantineEntry {
            id,
            path: path.to_string(),
            side,
            fingerprint: fingerprint.clone(),
            quarantined_at: now,
            location: location.clone(),
        };

        write_document(&location, path, content)
            .with_context(|| format!("Failed to quarantine {side} version of {path}"))?;

        let manifest = serde_json::to_string_pretty(&entry)
            .context("Failed to serialize quarantine manifest")?;
        fs::write(location.join(MANIFEST), manifest)
            .with_context(|| format!("Failed to write quarantine manifest for {path}"))?;

        log::info!(
            "Quarantined {} version of {} at {}",
            side,
            path,
            entry.content_path().display()
        );
        Ok(entry.content_path())
    }

    /// All entries, newest first
    ///
    /// Folders without a readable manifest are skipped.
    pub fn list(&self) -> Result<Vec<QuarantineEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for item in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read {}", self.dir.display()))?
        {
            let location = item?.path();
            let manifest_path = location.join(MANIFEST);
            if !manifest_path.is_file() {
                continue;
            }

            let parsed = fs::read_to_string(&manifest_path)
                .ok()
                .and_then(|content| serde_json::from_str::<QuarantineEntry>(&content).ok());
            match parsed {
                Some(mut entry) => {
                    entry.location = location;
                    entries.push(entry);
                }
                None => log::warn!("Ignoring unreadable manifest {}", manifest_path.display()),
            }
        }

        entries.sort_by(|a, b| b.quarantined_at.cmp(&a.quarantined_at));
        Ok(entries)
    }

    /// Delete entries older than `retention_days`
    ///
    /// Returns the entries that were (or, in a dry run, would be) deleted.
    pub fn prune(&self, retention_days: u32, dry_run: bool) -> Result<Vec<QuarantineEntry>> {
        let threshold = Utc::now() - chrono::Duration::days(i64::from(retention_days));

        let expired: Vec<_> = self
            .list()?
            .into_iter()
            .filter(|entry| entry.quarantined_at < threshold)
            .collect();

        if !dry_run {
            for entry in &expired {
                if let Err(e) = fs::remove_dir_all(&entry.location) {
                    log::warn!(
                        "Failed to delete quarantine entry {}: {}",
                        entry.location.display(),
                        e
                    );
                }
            }
        }

        Ok(expired)
    }
}
