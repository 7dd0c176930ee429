use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::filter::DocumentFilter;

/// Default cloud endpoint used when the config file does not name one
pub const DEFAULT_API_BASE: &str = "https://cloud.mdflare.com";

/// Cross-platform configuration directory manager
pub struct ConfigManager;

impl ConfigManager {
    /// Get the main configuration directory path following platform conventions:
    /// - Linux: $XDG_CONFIG_HOME/mdflare-sync or ~/.config/mdflare-sync
    /// - macOS: ~/Library/Application Support/mdflare-sync
    /// - Windows: %APPDATA%\mdflare-sync
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            // Follow XDG Base Directory Specification
            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                Ok(PathBuf::from(xdg_config).join("mdflare-sync"))
            } else {
                let home = dirs::home_dir().context("Failed to get home directory")?;
                Ok(home.join(".config").join("mdflare-sync"))
            }
        }

        #[cfg(target_os = "macos")]
        {
            let home = dirs::home_dir().context("Failed to get home directory")?;
            Ok(home.join("Library").join("Application Support").join("mdflare-sync"))
        }

        #[cfg(target_os = "windows")]
        {
            Ok(dirs::config_dir()
                .context("Failed to get Windows config directory")?
                .join("mdflare-sync"))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            let home = dirs::home_dir().context("Failed to get home directory")?;
            Ok(home.join(".mdflare-sync"))
        }
    }

    /// Get the config file path (config.toml)
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the default quarantine directory for conflict losers
    pub fn default_quarantine_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("quarantine"))
    }

    /// Get the path of the last sweep report
    pub fn sweep_report_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("last-sweep.json"))
    }

    /// Get the log file path
    pub fn log_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("mdflare-sync.log"))
    }

    /// Ensure the configuration directory exists
    pub fn ensure_config_dir() -> Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
        Ok(config_dir)
    }
}

/// Timing knobs for the sync service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between full sweeps
    pub sweep_interval_secs: u64,
    /// Quiet period a path must observe before a touched event fires
    pub debounce_ms: u64,
    /// Upper bound on how long continuous activity can postpone an event
    pub max_debounce_ms: u64,
    /// Timeout applied to every remote call
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            debounce_ms: 1000,
            max_debounce_ms: 10_000,
            request_timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_debounce(&self) -> Duration {
        Duration::from_millis(self.max_debounce_ms.max(self.debounce_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Retry behaviour for transient remote failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Where conflict losers are kept and for how long
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuarantineSettings {
    /// Override for the quarantine directory (defaults to `<config dir>/quarantine`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub retention_days: u32,
}

impl Default for QuarantineSettings {
    fn default() -> Self {
        Self {
            dir: None,
            retention_days: 30,
        }
    }
}

impl QuarantineSettings {
    /// Resolve the effective quarantine directory
    pub fn resolve_dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => ConfigManager::default_quarantine_dir(),
        }
    }
}

/// The persisted connection record plus sync tunables
///
/// Read once at startup. The engine never writes it; only the `config` and
/// `init` commands do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub api_token: String,

    /// Root of the synced document tree
    #[serde(default)]
    pub local_path: PathBuf,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub filter: DocumentFilter,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub quarantine: QuarantineSettings,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            username: String::new(),
            api_token: String::new(),
            local_path: PathBuf::new(),
            sync: SyncSettings::default(),
            filter: DocumentFilter::default(),
            retry: RetrySettings::default(),
            quarantine: QuarantineSettings::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&ConfigManager::config_file_path()?)
    }

    /// Load configuration from an explicit file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: SyncConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&ConfigManager::config_file_path()?)
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Whether enough is configured to start syncing
    pub fn is_configured(&self) -> bool {
        !self.api_base.is_empty()
            && !self.username.is_empty()
            && !self.api_token.is_empty()
            && !self.local_path.as_os_str().is_empty()
    }

    /// Fail with a readable message if the config is incomplete
    pub fn ensure_configured(&self) -> Result<()> {
        if self.is_configured() {
            return Ok(());
        }

        let mut missing = Vec::new();
        if self.api_base.is_empty() {
            missing.push("api_base");
        }
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.api_token.is_empty() {
            missing.push("api_token");
        }
        if self.local_path.as_os_str().is_empty() {
            missing.push("local_path");
        }

        Err(anyhow::anyhow!(
            "Sync not configured (missing: {}). Run 'mdflare-sync init' first.",
            missing.join(", ")
        ))
    }
}

/// Update individual fields of the stored configuration
pub fn update_config(
    api_base: Option<String>,
    username: Option<String>,
    api_token: Option<String>,
    local_path: Option<PathBuf>,
    sweep_interval_secs: Option<u64>,
) -> Result<SyncConfig> {
    let mut config = SyncConfig::load()?;

    if let Some(base) = api_base {
        config.api_base = base.trim_end_matches('/').to_string();
    }
    if let Some(user) = username {
        config.username = user;
    }
    if let Some(token) = api_token {
        config.api_token = token;
    }
    if let Some(path) = local_path {
        config.local_path = path;
    }
    if let Some(secs) = sweep_interval_secs {
        config.sync.sweep_interval_secs = secs;
    }

    config.save()?;
    Ok(config)
}
