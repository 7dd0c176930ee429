use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use super::engine::SyncEngine;
use crate::config::SyncConfig;
use crate::logger;
use crate::quarantine::Quarantine;
use crate::remote::{HttpRemote, RemoteStore, RetryPolicy, Retrying};
use crate::report::{Health, ServiceStatus, SweepReport};
use crate::watch::{WatchEvent, WatchSource};

/// Builds a remote client from the current configuration
pub type Connector = Box<dyn Fn(&SyncConfig) -> Result<Arc<dyn RemoteStore>> + Send>;

/// Re-reads the configuration, used to pick up a refreshed token
pub type ConfigSource = Box<dyn Fn() -> Result<SyncConfig> + Send>;

/// Work items for the sync worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Settled local paths from the watcher
    Touched(Vec<String>),
    /// Periodic full sweep
    Sweep,
    /// The watcher lost events; sweep to catch up
    Rescan,
    Shutdown,
}

/// The HTTP client with retries, as configured
pub fn connect_http(config: &SyncConfig) -> Result<Arc<dyn RemoteStore>> {
    let http = HttpRemote::new(
        &config.api_base,
        &config.username,
        &config.api_token,
        config.sync.request_timeout(),
    )?;
    Ok(Arc::new(Retrying::new(http, RetryPolicy::from(&config.retry))))
}

/// An engine for the configured root and quarantine
pub fn engine_for(config: &SyncConfig, remote: Arc<dyn RemoteStore>) -> Result<SyncEngine> {
    let quarantine = Quarantine::new(config.quarantine.resolve_dir()?);
    Ok(SyncEngine::new(
        remote,
        config.local_path.clone(),
        config.filter.clone(),
        quarantine,
    ))
}

/// How the service finds its remote and reports back
pub struct ServiceOptions {
    pub connect: Connector,
    pub reload: ConfigSource,
    /// Start the filesystem watcher (sweeps still run without it)
    pub watch: bool,
    /// Where to persist [`ServiceStatus`] after every sweep
    pub status_path: Option<PathBuf>,
    /// Append pass summaries to the log file
    pub log_to_file: bool,
}

impl ServiceOptions {
    pub fn new(connect: Connector, reload: ConfigSource) -> Self {
        Self {
            connect,
            reload,
            watch: true,
            status_path: None,
            log_to_file: false,
        }
    }

    /// HTTP remote, config file reloads, status file and file logging
    pub fn production() -> Result<Self> {
        let mut options = Self::new(Box::new(connect_http), Box::new(SyncConfig::load));
        options.status_path = Some(crate::config::ConfigManager::sweep_report_path()?);
        options.log_to_file = true;
        Ok(options)
    }
}

/// Handle on a running sync service
///
/// Dropping the handle shuts the service down.
pub struct ServiceHandle {
    tx: Sender<Trigger>,
    status: Arc<Mutex<ServiceStatus>>,
    worker: Option<JoinHandle<()>>,
    timer: Option<(Sender<()>, JoinHandle<()>)>,
    watcher: Option<WatchSource>,
}

impl ServiceHandle {
    pub fn status(&self) -> ServiceStatus {
        lock(&self.status).clone()
    }

    pub fn health(&self) -> Health {
        self.status().health()
    }

    /// Queue a full sweep
    pub fn request_sweep(&self) -> Result<()> {
        self.send(Trigger::Sweep)
    }

    /// Queue local paths as if the watcher had reported them
    pub fn touch(&self, paths: Vec<String>) -> Result<()> {
        self.send(Trigger::Touched(paths))
    }

    fn send(&self, trigger: Trigger) -> Result<()> {
        self.tx
            .send(trigger)
            .map_err(|_| anyhow!("Sync service is not running"))
    }

    /// Stop the timer and watcher, let the current pass finish, and join
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    /// Block until the worker exits
    pub fn wait(mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("Sync worker panicked"))?;
        }
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some((stop_tx, timer)) = self.timer.take() {
            drop(stop_tx);
            let _ = timer.join();
        }
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(Trigger::Shutdown);
            worker
                .join()
                .map_err(|_| anyhow!("Sync worker panicked"))?;
            log::info!("Sync service stopped");
        }
        Ok(())
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{e:#}");
        }
    }
}

fn lock(status: &Mutex<ServiceStatus>) -> MutexGuard<'_, ServiceStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Start continuous sync for `config`
///
/// An initial sweep runs right away on the worker thread, then one every
/// `sweep_interval`. Watched local changes are pushed as they settle.
pub fn start(config: SyncConfig, options: ServiceOptions) -> Result<ServiceHandle> {
    config.ensure_configured()?;
    if !config.local_path.is_dir() {
        anyhow::bail!(
            "Local folder does not exist: {}",
            config.local_path.display()
        );
    }

    let remote = (options.connect)(&config).context("Failed to set up the remote client")?;
    let engine = engine_for(&config, remote)?;
    let status = Arc::new(Mutex::new(ServiceStatus::new(
        config.sync.sweep_interval_secs,
    )));

    let (tx, rx) = mpsc::channel();

    let worker = Worker {
        engine,
        rx,
        status: Arc::clone(&status),
        pending: BTreeSet::new(),
        paused: false,
        token: config.api_token.clone(),
        connect: options.connect,
        reload: options.reload,
        status_path: options.status_path,
        log_to_file: options.log_to_file,
    };
    let worker = std::thread::Builder::new()
        .name("mdflare-sync".to_string())
        .spawn(move || worker.run())
        .context("Failed to spawn sync worker")?;

    let timer = spawn_timer(config.sync.sweep_interval(), tx.clone())?;

    let watcher = if options.watch {
        let sink_tx = tx.clone();
        let spawned = WatchSource::spawn(
            &config.local_path,
            config.filter.clone(),
            config.sync.debounce(),
            config.sync.max_debounce(),
            move |event| {
                let trigger = match event {
                    WatchEvent::Touched(paths) => Trigger::Touched(paths),
                    WatchEvent::Rescan => Trigger::Rescan,
                };
                let _ = sink_tx.send(trigger);
            },
        );
        match spawned {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("File watching unavailable, relying on sweeps: {e:#}");
                None
            }
        }
    } else {
        None
    };

    log::info!(
        "Syncing {} with {} every {}s",
        config.local_path.display(),
        config.api_base,
        config.sync.sweep_interval().as_secs()
    );

    Ok(ServiceHandle {
        tx,
        status,
        worker: Some(worker),
        timer: Some(timer),
        watcher,
    })
}

fn spawn_timer(interval: Duration, tx: Sender<Trigger>) -> Result<(Sender<()>, JoinHandle<()>)> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let handle = std::thread::Builder::new()
        .name("mdflare-timer".to_string())
        .spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if tx.send(Trigger::Sweep).is_err() {
                        break;
                    }
                }
                // Stop requested or handle dropped
                _ => break,
            }
        })
        .context("Failed to spawn sweep timer")?;
    Ok((stop_tx, handle))
}

/// Single writer: the only owner of the engine and its state
struct Worker {
    engine: SyncEngine,
    rx: Receiver<Trigger>,
    status: Arc<Mutex<ServiceStatus>>,
    /// Paths waiting for the next incremental pass, or for credentials
    pending: BTreeSet<String>,
    paused: bool,
    token: String,
    connect: Connector,
    reload: ConfigSource,
    status_path: Option<PathBuf>,
    log_to_file: bool,
}

impl Worker {
    fn run(mut self) {
        self.sweep();

        while let Ok(trigger) = self.rx.recv() {
            match trigger {
                Trigger::Touched(paths) => {
                    self.pending.extend(paths);
                    self.flush_pending();
                }
                Trigger::Sweep => self.sweep(),
                Trigger::Rescan => {
                    log::info!("Rescan requested by the watcher");
                    self.sweep();
                }
                Trigger::Shutdown => break,
            }
        }
    }

    fn flush_pending(&mut self) {
        if self.paused || self.pending.is_empty() {
            self.publish_pending();
            return;
        }

        let batch: Vec<String> = std::mem::take(&mut self.pending).into_iter().collect();
        let report = self.engine.handle_touched(&batch);
        if report.auth_required {
            self.pause();
            // Processing is idempotent: already pushed paths become no-ops
            self.pending.extend(batch);
        }
        self.log_report(&report);
        self.publish_pending();
    }

    fn sweep(&mut self) {
        if self.paused && !self.try_resume() {
            return;
        }
        self.flush_pending();
        if self.paused {
            return;
        }

        match self.engine.sweep() {
            Ok(report) => {
                if report.auth_required {
                    self.pause();
                }
                self.log_report(&report);
                lock(&self.status).record_sweep(&report);
            }
            Err(e) => {
                log::error!("Sweep failed: {e:#}");
                self.file_log(&format!("Sweep failed: {e:#}"));
                lock(&self.status).record_error(&e);
            }
        }
        self.publish_pending();
        self.persist_status();
    }

    fn pause(&mut self) {
        if !self.paused {
            log::warn!(
                "Remote work paused until the API token is updated (mdflare-sync config --token ...)"
            );
            self.file_log("Paused: authentication required");
        }
        self.paused = true;
        lock(&self.status).paused_for_auth = true;
        self.persist_status();
    }

    /// Resume once the configuration carries a different token
    fn try_resume(&mut self) -> bool {
        let config = match (self.reload)() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to reload configuration: {e:#}");
                return false;
            }
        };
        if config.api_token == self.token {
            log::debug!("Still waiting for new credentials");
            return false;
        }

        match (self.connect)(&config) {
            Ok(remote) => {
                self.engine.set_remote(remote);
                self.token = config.api_token;
                self.paused = false;
                lock(&self.status).paused_for_auth = false;
                log::info!("Credentials updated, resuming sync");
                self.file_log("Resumed with new credentials");
                true
            }
            Err(e) => {
                log::warn!("Failed to reconnect with new credentials: {e:#}");
                false
            }
        }
    }

    fn publish_pending(&self) {
        lock(&self.status).pending_paths = self.pending.len();
    }

    fn log_report(&self, report: &SweepReport) {
        if report.change_count() == 0 && report.failures.is_empty() && !report.auth_required {
            log::debug!("{}", report.summary_line());
            return;
        }
        log::info!("{}", report.summary_line());
        self.file_log(&report.summary_line());
        for conflict in &report.conflicts {
            self.file_log(&conflict.description());
        }
        for failure in &report.failures {
            self.file_log(&format!("Failed {}: {}", failure.path, failure.error));
        }
    }

    fn file_log(&self, message: &str) {
        if self.log_to_file {
            if let Err(e) = logger::log_to_file(message) {
                log::debug!("Could not write to log file: {e:#}");
            }
        }
    }

    fn persist_status(&self) {
        if let Some(path) = &self.status_path {
            let status = lock(&self.status).clone();
            if let Err(e) = status.save(path) {
                log::warn!("Failed to save sync status: {e:#}");
            }
        }
    }
}
