use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::conflict::Conflict;

/// Which trigger produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// Full three-way sweep
    Sweep,
    /// Incremental pass over watched paths
    Touched,
}

/// A path that could not be reconciled during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFailure {
    pub path: String,
    pub error: String,
}

/// A local move carried over to the remote as one rename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedPath {
    pub from: String,
    pub to: String,
}

/// Outcome of one sweep or incremental pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub kind: PassKind,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Paths whose remote version was written locally
    #[serde(default)]
    pub pulled: Vec<String>,
    /// Paths whose local version was written remotely
    #[serde(default)]
    pub pushed: Vec<String>,
    #[serde(default)]
    pub deleted_local: Vec<String>,
    #[serde(default)]
    pub deleted_remote: Vec<String>,
    #[serde(default)]
    pub renamed: Vec<RenamedPath>,
    /// Paths found identical on both sides and recorded without any write
    #[serde(default)]
    pub adopted: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub failures: Vec<PathFailure>,

    /// Remote work stopped because credentials were rejected
    #[serde(default)]
    pub auth_required: bool,
}

impl SweepReport {
    pub fn new(kind: PassKind) -> Self {
        Self {
            kind,
            started_at: Utc::now(),
            finished_at: None,
            pulled: Vec::new(),
            pushed: Vec::new(),
            deleted_local: Vec::new(),
            deleted_remote: Vec::new(),
            renamed: Vec::new(),
            adopted: Vec::new(),
            conflicts: Vec::new(),
            failures: Vec::new(),
            auth_required: false,
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn fail(&mut self, path: impl Into<String>, error: &anyhow::Error) {
        let path = path.into();
        let error = format!("{error:#}");
        log::warn!("Failed to sync {path}: {error}");
        self.failures.push(PathFailure { path, error });
    }

    /// No per-path failures and no authentication stop
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.auth_required
    }

    /// Number of paths that changed on either side
    pub fn change_count(&self) -> usize {
        self.pulled.len()
            + self.pushed.len()
            + self.deleted_local.len()
            + self.deleted_remote.len()
            + self.renamed.len()
            + self.conflicts.len()
    }

    /// One-line summary for the log
    pub fn summary_line(&self) -> String {
        let kind = match self.kind {
            PassKind::Sweep => "Sweep",
            PassKind::Touched => "Local changes",
        };
        let mut line = format!(
            "{kind}: {} pulled, {} pushed, {} deleted locally, {} deleted remotely, {} renamed, {} conflicts, {} failed",
            self.pulled.len(),
            self.pushed.len(),
            self.deleted_local.len(),
            self.deleted_remote.len(),
            self.renamed.len(),
            self.conflicts.len(),
            self.failures.len()
        );
        if self.auth_required {
            line.push_str(" (stopped: authentication required)");
        }
        line
    }

    /// Print a colored console summary
    pub fn print_summary(&self) {
        println!("\n{}", "=== Sweep Summary ===".bold().cyan());
        println!("{}: {}", "Started".bold(), self.started_at.to_rfc3339());

        let rows: [(&str, &[String]); 4] = [
            ("Pulled", &self.pulled),
            ("Pushed", &self.pushed),
            ("Deleted locally", &self.deleted_local),
            ("Deleted remotely", &self.deleted_remote),
        ];
        for (label, paths) in rows {
            if paths.is_empty() {
                continue;
            }
            println!("{}: {}", label.bold(), paths.len().to_string().green());
            for path in paths {
                println!("  {path}");
            }
        }

        if !self.renamed.is_empty() {
            println!("{}: {}", "Renamed".bold(), self.renamed.len().to_string().green());
            for rename in &self.renamed {
                println!("  {} -> {}", rename.from, rename.to);
            }
        }

        if !self.conflicts.is_empty() {
            println!(
                "{}: {}",
                "Conflicts".bold(),
                self.conflicts.len().to_string().yellow()
            );
            for conflict in &self.conflicts {
                println!("  {}", conflict.description().replace('\n', "\n  "));
            }
        }

        if !self.failures.is_empty() {
            println!(
                "{}: {}",
                "Failed".bold(),
                self.failures.len().to_string().red()
            );
            for failure in &self.failures {
                println!("  {}: {}", failure.path, failure.error.dimmed());
            }
        }

        if self.auth_required {
            println!(
                "\n{}",
                "Authentication required: update the token with 'mdflare-sync config --token'"
                    .red()
                    .bold()
            );
        } else if self.change_count() == 0 && self.failures.is_empty() {
            println!("\n{}", "Everything is in sync".green());
        }
        println!();
    }
}

/// User-visible sync health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Disconnected,
    AuthRequired,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Disconnected => "disconnected",
            Health::AuthRequired => "authentication required",
        };
        f.write_str(label)
    }
}

/// Rolling status of the sync service, persisted after every sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub last_sweep: Option<SweepReport>,
    /// End of the last sweep that finished without any failure
    #[serde(default)]
    pub last_clean_sweep: Option<DateTime<Utc>>,
    /// Error that aborted the last sweep as a whole, if any
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub paused_for_auth: bool,
    /// Watched paths waiting for the service to resume
    #[serde(default)]
    pub pending_paths: usize,
    pub updated_at: DateTime<Utc>,
}

impl ServiceStatus {
    pub fn new(sweep_interval_secs: u64) -> Self {
        Self {
            sweep_interval_secs: sweep_interval_secs.max(1),
            last_sweep: None,
            last_clean_sweep: None,
            last_error: None,
            paused_for_auth: false,
            pending_paths: 0,
            updated_at: Utc::now(),
        }
    }

    /// Fold a finished sweep into the status
    pub fn record_sweep(&mut self, report: &SweepReport) {
        if report.is_clean() {
            self.last_clean_sweep = report.finished_at.or(Some(Utc::now()));
        }
        self.paused_for_auth = report.auth_required;
        self.last_error = None;
        self.last_sweep = Some(report.clone());
        self.updated_at = Utc::now();
    }

    /// Record a sweep that could not run at all
    pub fn record_error(&mut self, error: &anyhow::Error) {
        self.last_error = Some(format!("{error:#}"));
        self.updated_at = Utc::now();
    }

    /// Evaluate health at `now`
    ///
    /// Healthy requires a clean sweep within three sweep intervals and no
    /// failures in the most recent one.
    pub fn health_at(&self, now: DateTime<Utc>) -> Health {
        if self.paused_for_auth {
            return Health::AuthRequired;
        }
        let Some(last_clean) = self.last_clean_sweep else {
            return Health::Disconnected;
        };

        let window = Duration::seconds(3 * self.sweep_interval_secs as i64);
        let stale = now - last_clean > window;
        let last_failed = self.last_error.is_some()
            || self
                .last_sweep
                .as_ref()
                .map_or(false, |report| !report.is_clean());

        if stale || last_failed {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }

    pub fn health(&self) -> Health {
        self.health_at(Utc::now())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize sync status")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write sync status to {}", path.display()))
    }

    /// Load a saved status; `None` if no sweep ever ran
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sync status from {}", path.display()))?;
        let status = serde_json::from_str(&content).context("Failed to parse sync status")?;
        Ok(Some(status))
    }

    /// Print a colored status block
    pub fn print(&self, quarantined: usize) {
        let health = self.health();
        let colored_health = match health {
            Health::Healthy => health.to_string().green(),
            Health::Degraded => health.to_string().yellow(),
            Health::Disconnected | Health::AuthRequired => health.to_string().red(),
        };

        println!("\n{}", "=== Sync Status ===".bold().cyan());
        println!("{}: {}", "Health".bold(), colored_health.bold());
        println!(
            "{}: {}",
            "Last clean sweep".bold(),
            self.last_clean_sweep
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        if let Some(report) = &self.last_sweep {
            println!("{}: {}", "Last sweep".bold(), report.summary_line());
        }
        if let Some(error) = &self.last_error {
            println!("{}: {}", "Last error".bold(), error.red());
        }
        if self.pending_paths > 0 {
            println!("{}: {}", "Pending paths".bold(), self.pending_paths);
        }
        println!("{}: {}", "Quarantined versions".bold(), quarantined);
        println!();
    }
}
