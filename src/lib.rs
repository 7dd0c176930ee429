//! # mdflare-sync
//!
//! Keeps a local folder of markdown documents consistent with MDFlare cloud
//! storage.
//!
//! ## Overview
//!
//! `mdflare-sync` watches a local folder and a remote document store and
//! propagates creates, edits, renames and deletes in both directions. The
//! remote is reached over a small HTTP API with whole-document operations
//! (list, read, write, delete, rename) authenticated by a per-user token.
//!
//! ## Key Features
//!
//! - **Two triggers**: settled local file events are pushed right away, and a
//!   periodic full sweep reconciles everything else
//! - **Three-way diff**: every path is compared across the remote listing, the
//!   local tree and the last agreed state, so deletions propagate and
//!   unchanged documents cost nothing
//! - **No silent data loss**: a conflict keeps the newer version and moves the
//!   other one to a quarantine folder
//! - **Rename detection**: a local move becomes one remote rename
//! - **Auth pause**: rejected credentials stop remote work until the token in
//!   the config file changes
//!
//! ## Architecture
//!
//! - Configuration and document selection ([`config`], [`filter`])
//! - Local and remote views of the tree ([`scanner`], [`fingerprint`], [`remote`])
//! - Change detection ([`watch`])
//! - Reconciliation ([`sync`], [`conflict`], [`quarantine`])
//! - User interface and reporting ([`onboarding`], [`handlers`], [`report`], [`logger`])

/// Platform-agnostic configuration directory and config file handling.
///
/// Locates the config directory following platform conventions (XDG on
/// Linux, Application Support on macOS, AppData on Windows) and reads the
/// connection record plus sync tunables from `config.toml`.
pub mod config;

/// Conflict decisions between two diverged versions of a document.
///
/// The most recently written version wins; equal or unknown timestamps fall
/// back to comparing content fingerprints so both sides agree.
pub mod conflict;

/// Selection of the documents that take part in syncing.
///
/// Filters by extension, exclude patterns, hidden path segments and size.
pub mod filter;

/// Content fingerprints used to detect change without comparing bytes.
pub mod fingerprint;

/// Command handlers behind the CLI subcommands.
pub mod handlers;

/// Logging configuration and utilities.
///
/// Sets up console logging (configurable via the `RUST_LOG` environment
/// variable) plus a persistent log file in the config directory with
/// automatic rotation.
pub mod logger;

/// Interactive onboarding flow for first-time setup.
pub mod onboarding;

/// Storage for versions that lost a conflict.
pub mod quarantine;

/// The remote document store: trait, HTTP client, retries and an in-memory
/// implementation.
pub mod remote;

/// Sweep reports, service status and health.
pub mod report;

/// Local tree scanning and safe document writes.
pub mod scanner;

/// Core synchronization: the three-way planner, the engine applying plans,
/// and the service driving it from watch events and a sweep timer.
pub mod sync;

/// Filesystem watching with per-path debouncing.
pub mod watch;
