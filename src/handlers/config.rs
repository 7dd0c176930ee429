//! Configuration command handlers
//!
//! Shows the stored configuration and updates individual fields of it.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::{self, ConfigManager, SyncConfig};
use crate::onboarding::{expand_tilde, is_valid_api_base};

/// Print the current configuration with the token masked
pub fn handle_config_show() -> Result<()> {
    let config = SyncConfig::load().context("Failed to load configuration")?;

    println!("{}", "Current Configuration".cyan().bold());
    println!("{}", "=".repeat(60).cyan());
    println!(
        "  {} {}",
        "Config file:".cyan(),
        ConfigManager::config_file_path()?.display()
    );
    println!();
    display_config_summary(&config);

    if !config.is_configured() {
        println!();
        println!(
            "{}",
            "Sync is not fully configured. Run 'mdflare-sync init'.".yellow()
        );
    }

    Ok(())
}

/// Update the given fields and save
pub fn handle_config_update(
    api_base: Option<String>,
    username: Option<String>,
    api_token: Option<String>,
    local_path: Option<String>,
    sweep_interval_secs: Option<u64>,
) -> Result<()> {
    if api_base.is_none()
        && username.is_none()
        && api_token.is_none()
        && local_path.is_none()
        && sweep_interval_secs.is_none()
    {
        return handle_config_show();
    }

    if let Some(base) = &api_base {
        if !is_valid_api_base(base) {
            return Err(anyhow::anyhow!(
                "Invalid API base URL. Must start with 'https://' or 'http://'"
            ));
        }
    }
    let local_path: Option<PathBuf> = local_path.map(|p| expand_tilde(&p)).transpose()?;
    let token_changed = api_token.is_some();

    let updated = config::update_config(
        api_base,
        username,
        api_token,
        local_path,
        sweep_interval_secs,
    )
    .context("Failed to update configuration")?;

    println!("\n{} Configuration saved successfully!", "✓".green().bold());
    display_config_summary(&updated);
    if token_changed {
        println!();
        println!(
            "{}",
            "A running service picks up the new token at its next sweep.".dimmed()
        );
    }

    Ok(())
}

/// Display a compact configuration summary
fn display_config_summary(config: &SyncConfig) {
    let or_unset = |value: &str| {
        if value.is_empty() {
            "Not set".dimmed().to_string()
        } else {
            value.to_string()
        }
    };

    println!("  {} {}", "API base:".cyan(), or_unset(&config.api_base));
    println!("  {} {}", "Username:".cyan(), or_unset(&config.username));
    println!("  {} {}", "API token:".cyan(), or_unset(&mask_token(&config.api_token)));
    println!(
        "  {} {}",
        "Local folder:".cyan(),
        or_unset(&config.local_path.display().to_string())
    );
    println!(
        "  {} {}s (debounce {}ms)",
        "Sweep interval:".cyan(),
        config.sync.sweep_interval_secs,
        config.sync.debounce_ms
    );
    println!(
        "  {} {}",
        "Extensions:".cyan(),
        config
            .filter
            .extensions
            .iter()
            .map(|e| format!(".{e}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  {} {}",
        "Exclude patterns:".cyan(),
        if config.filter.exclude_patterns.is_empty() {
            "None".dimmed().to_string()
        } else {
            config.filter.exclude_patterns.join(", ")
        }
    );
    println!(
        "  {} {:.1} MB",
        "Max file size:".cyan(),
        config.filter.max_file_size_bytes as f64 / (1024.0 * 1024.0)
    );
    println!(
        "  {} {} days",
        "Quarantine retention:".cyan(),
        config.quarantine.retention_days
    );
}

/// Keep only the last four characters of a token visible
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
