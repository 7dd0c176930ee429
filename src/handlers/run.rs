//! Service and one-shot sweep handlers

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::{ConfigManager, SyncConfig};
use crate::report::ServiceStatus;
use crate::sync::{self, ServiceOptions};

/// Run the sync service in the foreground until the process is stopped
pub fn handle_run(watch: bool) -> Result<()> {
    let config = SyncConfig::load().context("Failed to load configuration")?;
    config.ensure_configured()?;

    let mut options = ServiceOptions::production()?;
    options.watch = watch;

    println!(
        "{} {} {} {}",
        "Syncing".green().bold(),
        config.local_path.display(),
        "with".green().bold(),
        config.api_base
    );
    if !watch {
        println!(
            "{}",
            format!(
                "File watching disabled, sweeping every {}s",
                config.sync.sweep_interval_secs
            )
            .dimmed()
        );
    }

    let handle = sync::start(config, options)?;
    handle.wait()
}

/// Run one full sweep and print what changed
pub fn handle_sweep() -> Result<()> {
    let config = SyncConfig::load().context("Failed to load configuration")?;
    let report = sync::sweep_once(&config)?;
    report.print_summary();

    let status_path = ConfigManager::sweep_report_path()?;
    let mut status = ServiceStatus::load(&status_path)
        .ok()
        .flatten()
        .unwrap_or_else(|| ServiceStatus::new(config.sync.sweep_interval_secs));
    status.record_sweep(&report);
    if let Err(e) = status.save(&status_path) {
        log::warn!("Failed to save sync status: {e:#}");
    }

    if report.auth_required {
        return Err(anyhow::anyhow!(
            "Authentication required: update the token with 'mdflare-sync config --token'"
        ));
    }
    if !report.failures.is_empty() {
        return Err(anyhow::anyhow!(
            "{} path(s) could not be synced",
            report.failures.len()
        ));
    }
    Ok(())
}
