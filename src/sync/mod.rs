// Module declarations
mod engine;
mod plan;
mod service;
mod state;

// Re-export public types and functions
pub use engine::{is_auth_error, SyncEngine};
pub use plan::{plan, SyncAction};
pub use service::{
    connect_http, engine_for, start, ConfigSource, Connector, ServiceHandle, ServiceOptions,
    Trigger,
};
pub use state::{SyncRecord, SyncState};

use anyhow::Result;

use crate::config::SyncConfig;
use crate::report::SweepReport;

/// Run a single full sweep against the configured remote
///
/// The sync state starts empty, so this compares content for every path
/// present on both sides.
pub fn sweep_once(config: &SyncConfig) -> Result<SweepReport> {
    config.ensure_configured()?;
    let remote = connect_http(config)?;
    let mut engine = engine_for(config, remote)?;
    engine.sweep()
}
