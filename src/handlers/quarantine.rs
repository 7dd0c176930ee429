//! Quarantine handlers
//!
//! Lists conflict losers and prunes entries past their retention period.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::SyncConfig;
use crate::quarantine::Quarantine;

fn open() -> Result<(SyncConfig, Quarantine)> {
    let config = SyncConfig::load().context("Failed to load configuration")?;
    let quarantine = Quarantine::new(config.quarantine.resolve_dir()?);
    Ok((config, quarantine))
}

/// Handle quarantine list command
pub fn handle_quarantine_list() -> Result<()> {
    let (_, quarantine) = open()?;
    let entries = quarantine.list().context("Failed to read quarantine")?;

    if entries.is_empty() {
        println!("{}", "No quarantined versions".dimmed());
        return Ok(());
    }

    println!(
        "{} ({})",
        "Quarantined versions".cyan().bold(),
        quarantine.dir().display()
    );
    println!();
    for entry in &entries {
        println!(
            "  {} {} {} version {}",
            entry.quarantined_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            entry.path.bold(),
            entry.side,
            entry.fingerprint.short().dimmed()
        );
        println!("    {}", entry.content_path().display());
    }
    println!();
    println!("{} entries", entries.len());

    Ok(())
}

/// Handle quarantine prune command
pub fn handle_quarantine_prune(older_than_days: Option<u32>, dry_run: bool) -> Result<()> {
    let (config, quarantine) = open()?;
    let retention_days = older_than_days.unwrap_or(config.quarantine.retention_days);

    if dry_run {
        println!("{}", "Quarantine prune (dry run)".cyan().bold());
        println!("  Would delete entries older than {} days", retention_days);
    } else {
        println!("{}", "Pruning quarantine...".cyan().bold());
        println!("  Deleting entries older than {} days", retention_days);
    }
    println!();

    let pruned = quarantine
        .prune(retention_days, dry_run)
        .context("Failed to prune quarantine")?;

    if pruned.is_empty() {
        println!("{}", "No entries to delete".dimmed());
    } else if dry_run {
        for entry in &pruned {
            println!("  {} ({})", entry.path, entry.location.display());
        }
        println!("{} {} entries would be deleted", "✓".green(), pruned.len());
    } else {
        println!("{} Deleted {} old entries", "✓".green(), pruned.len());
    }

    Ok(())
}
