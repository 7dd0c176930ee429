use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;

use crate::config::ConfigManager;

/// Size at which the log file is rotated to `mdflare-sync.log.old`
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Initialize the logging system
///
/// Console output goes to stderr so that `status` and `sweep` output on
/// stdout stays clean. The level follows `RUST_LOG` (default `info`), or
/// `debug` when `verbose` is set.
///
/// Sweep summaries and failures are also appended to a log file in the config
/// directory via [`log_to_file`]:
/// - Linux: ~/.config/mdflare-sync/mdflare-sync.log or $XDG_CONFIG_HOME/mdflare-sync/mdflare-sync.log
/// - macOS: ~/Library/Application Support/mdflare-sync/mdflare-sync.log
/// - Windows: %APPDATA%\mdflare-sync\mdflare-sync.log
///
/// ```bash
/// # Watch every remote call and path decision
/// RUST_LOG=debug mdflare-sync run
///
/// # Quiet console, file logging continues
/// RUST_LOG=off mdflare-sync run
/// ```
pub fn init_logger(verbose: bool) -> Result<()> {
    ConfigManager::ensure_config_dir()?;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        std::env::var("RUST_LOG")
            .ok()
            .and_then(|s| s.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info)
    };

    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        // reqwest and its transport stack are chatty at debug
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .target(env_logger::Target::Stderr)
        .try_init()
        .ok(); // Ignore error if logger is already initialized

    rotate_log_if_needed()?;
    log_to_file(&format!("Logger initialized with level: {level:?}"))?;

    Ok(())
}

/// Append a line to the log file only
pub fn log_to_file(message: &str) -> Result<()> {
    let log_path = ConfigManager::log_file_path()?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )?;

    Ok(())
}

/// Rotate the log file once it exceeds 10MB, keeping a single `.old` backup
pub fn rotate_log_if_needed() -> Result<()> {
    let log_path = ConfigManager::log_file_path()?;

    if !log_path.exists() {
        return Ok(());
    }

    if std::fs::metadata(&log_path)?.len() > MAX_LOG_SIZE {
        let old_log_path = log_path.with_extension("log.old");
        if old_log_path.exists() {
            std::fs::remove_file(&old_log_path)?;
        }
        std::fs::rename(&log_path, &old_log_path)?;
        log::info!("Log file rotated to {}", old_log_path.display());
    }

    Ok(())
}
