use anyhow::{Context, Result};
use colored::Colorize;
use inquire::{Confirm, Password, PasswordDisplayMode, Text};
use std::path::PathBuf;

use crate::config::{SyncConfig, DEFAULT_API_BASE};

/// Answers collected during first-time setup
#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingConfig {
    pub api_base: String,
    pub username: String,
    pub api_token: String,
    pub local_path: PathBuf,
    pub create_local_path: bool,
}

impl OnboardingConfig {
    /// Merge the answers into an existing configuration, keeping its tunables
    pub fn apply_to(&self, config: &mut SyncConfig) {
        config.api_base = self.api_base.trim_end_matches('/').to_string();
        config.username = self.username.clone();
        config.api_token = self.api_token.clone();
        config.local_path = self.local_path.clone();
    }
}

/// Run the interactive onboarding flow
///
/// Values already present in `current` are offered as defaults.
pub fn run_onboarding(current: &SyncConfig) -> Result<OnboardingConfig> {
    println!("\n{}", "⚙️  Let's connect mdflare-sync to your account".cyan().bold());
    println!();

    let default_base = if current.api_base.is_empty() {
        DEFAULT_API_BASE.to_string()
    } else {
        current.api_base.clone()
    };
    let api_base = Text::new("API base URL:")
        .with_default(&default_base)
        .with_help_message("Root URL of the MDFlare service")
        .prompt()
        .context("Failed to get API base URL")?;

    if !is_valid_api_base(&api_base) {
        return Err(anyhow::anyhow!(
            "Invalid API base URL. Must start with 'https://' or 'http://'"
        ));
    }

    let mut username_prompt = Text::new("Username:");
    if !current.username.is_empty() {
        username_prompt = username_prompt.with_default(&current.username);
    }
    let username = username_prompt
        .prompt()
        .context("Failed to get username")?
        .trim()
        .to_string();
    if username.is_empty() {
        return Err(anyhow::anyhow!("Username must not be empty"));
    }

    let api_token = Password::new("API token:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .with_help_message("Create one in the MDFlare web app under Settings → API tokens")
        .prompt()
        .context("Failed to get API token")?;
    if api_token.trim().is_empty() {
        return Err(anyhow::anyhow!("API token must not be empty"));
    }

    let default_path = if current.local_path.as_os_str().is_empty() {
        "~/MDFlare".to_string()
    } else {
        current.local_path.display().to_string()
    };
    let path_str = Text::new("Local folder to sync:")
        .with_default(&default_path)
        .with_help_message("Markdown documents in this folder are kept in sync with the cloud")
        .prompt()
        .context("Failed to get local folder")?;
    let local_path = expand_tilde(&path_str)?;

    let create_local_path = if local_path.exists() {
        false
    } else {
        Confirm::new(&format!("{} does not exist. Create it?", local_path.display()))
            .with_default(true)
            .prompt()
            .context("Failed to get folder preference")?
    };

    println!();
    println!("{}", "✓ Configuration complete!".green().bold());

    Ok(OnboardingConfig {
        api_base,
        username,
        api_token: api_token.trim().to_string(),
        local_path,
        create_local_path,
    })
}

/// Validate API base URL format
pub fn is_valid_api_base(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.trim_matches('/').is_empty())
}

/// Expand tilde in path
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    if path.starts_with("~/") || path == "~" {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        if path == "~" {
            Ok(home)
        } else {
            Ok(home.join(&path[2..]))
        }
    } else {
        Ok(PathBuf::from(path))
    }
}
