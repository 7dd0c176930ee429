//! Command handler modules
//!
//! This module contains the command handler functions called from main.rs,
//! organized by functionality area.

pub mod config;
pub mod onboarding;
pub mod quarantine;
pub mod run;
pub mod status;

// Re-export all public handler functions for convenient use
pub use config::{handle_config_show, handle_config_update};
pub use onboarding::{is_initialized, run_init_from_flags, run_onboarding_flow};
pub use quarantine::{handle_quarantine_list, handle_quarantine_prune};
pub use run::{handle_run, handle_sweep};
pub use status::handle_status;
