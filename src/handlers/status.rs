//! Status handler

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::{ConfigManager, SyncConfig};
use crate::quarantine::Quarantine;
use crate::report::ServiceStatus;

/// Show health and the outcome of the last sweep
pub fn handle_status() -> Result<()> {
    let config = SyncConfig::load().context("Failed to load configuration")?;

    println!(
        "{} {} {} {}",
        "Syncing".bold(),
        config.local_path.display(),
        "with".bold(),
        config.api_base
    );

    let quarantined = Quarantine::new(config.quarantine.resolve_dir()?)
        .list()
        .map(|entries| entries.len())
        .unwrap_or(0);

    match ServiceStatus::load(&ConfigManager::sweep_report_path()?)? {
        Some(status) => status.print(quarantined),
        None => {
            println!();
            println!(
                "{}",
                "No sweep has run yet. Start the service with 'mdflare-sync run'.".yellow()
            );
        }
    }

    Ok(())
}
