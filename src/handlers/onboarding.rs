//! Onboarding and initialization handlers
//!
//! Handles the first-time setup flow including checking initialization
//! status and running the interactive onboarding process.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

use crate::config::SyncConfig;
use crate::onboarding::{self, expand_tilde, is_valid_api_base};

/// Check if mdflare-sync has been configured
pub fn is_initialized() -> Result<bool> {
    Ok(SyncConfig::load()?.is_configured())
}

/// Run the onboarding flow and save the resulting configuration
pub fn run_onboarding_flow() -> Result<()> {
    let mut config = SyncConfig::load().context("Failed to load current configuration")?;

    let answers =
        onboarding::run_onboarding(&config).context("Onboarding cancelled or failed")?;

    if answers.create_local_path {
        fs::create_dir_all(&answers.local_path).with_context(|| {
            format!("Failed to create {}", answers.local_path.display())
        })?;
        println!(
            "{} Created {}",
            "✓".green(),
            answers.local_path.display()
        );
    }

    answers.apply_to(&mut config);
    config.save().context("Failed to save configuration")?;

    println!("{}", "✓ Ready to sync!".green().bold());
    println!("  Run {} to start syncing.", "mdflare-sync run".cyan());
    println!();

    Ok(())
}

/// Initialize from command-line values without prompting
///
/// Used when every required value is passed as a flag, e.g. from a service
/// unit or a provisioning script.
pub fn run_init_from_flags(
    api_base: Option<String>,
    username: String,
    api_token: String,
    local_path: String,
) -> Result<()> {
    let mut config = SyncConfig::load().context("Failed to load current configuration")?;

    if let Some(base) = api_base {
        if !is_valid_api_base(&base) {
            return Err(anyhow::anyhow!(
                "Invalid API base URL. Must start with 'https://' or 'http://'"
            ));
        }
        config.api_base = base.trim_end_matches('/').to_string();
    }
    config.username = username;
    config.api_token = api_token;
    config.local_path = resolve_local_path(&local_path)?;

    config.ensure_configured()?;
    config.save().context("Failed to save configuration")?;

    println!("{}", "✓ Initialization complete!".green().bold());
    println!("  {} {}", "API:".cyan(), config.api_base);
    println!("  {} {}", "User:".cyan(), config.username);
    println!("  {} {}", "Folder:".cyan(), config.local_path.display());
    println!();

    Ok(())
}

fn resolve_local_path(raw: &str) -> Result<PathBuf> {
    let path = expand_tilde(raw)?;
    if !path.exists() {
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        log::info!("Created local folder {}", path.display());
    }
    Ok(path)
}
