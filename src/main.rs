use anyhow::Result;
use clap::{Parser, Subcommand};

use mdflare_sync::{handlers, logger};

#[derive(Parser)]
#[command(name = "mdflare-sync")]
#[command(about = "Keep a local markdown folder in sync with MDFlare cloud storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run continuous sync in the foreground (default)
    Run {
        /// Only sync on the sweep timer, without watching the folder
        #[arg(long)]
        no_watch: bool,
    },

    /// Run one full sweep and exit
    Sweep,

    /// Show health and the outcome of the last sweep
    Status,

    /// Show or change settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Root URL of the MDFlare API
        #[arg(long)]
        api_base: Option<String>,

        #[arg(long)]
        username: Option<String>,

        /// API token (a running service picks it up at the next sweep)
        #[arg(long)]
        token: Option<String>,

        /// Local folder to sync
        #[arg(long)]
        local_path: Option<String>,

        /// Seconds between full sweeps
        #[arg(long)]
        sweep_interval: Option<u64>,
    },

    /// Set up the connection, interactively unless all values are given
    Init {
        #[arg(long)]
        api_base: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        token: Option<String>,

        #[arg(long)]
        local_path: Option<String>,
    },

    /// Inspect or clean up versions that lost a conflict
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// List quarantined versions, newest first
    List,

    /// Delete entries past the retention period
    Prune {
        /// Override the configured retention
        #[arg(long)]
        older_than_days: Option<u32>,

        /// Show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

fn ensure_initialized() -> Result<()> {
    if handlers::is_initialized()? {
        return Ok(());
    }
    if !atty::is(atty::Stream::Stdin) {
        return Err(anyhow::anyhow!(
            "Sync not configured. Run 'mdflare-sync init --username ... --token ... --local-path ...'"
        ));
    }
    handlers::run_onboarding_flow()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logger::init_logger(cli.verbose) {
        eprintln!("Warning: Failed to initialize logger: {e:#}");
    }

    match cli.command.unwrap_or(Commands::Run { no_watch: false }) {
        Commands::Run { no_watch } => {
            ensure_initialized()?;
            handlers::handle_run(!no_watch)?;
        }
        Commands::Sweep => {
            ensure_initialized()?;
            handlers::handle_sweep()?;
        }
        Commands::Status => {
            handlers::handle_status()?;
        }
        Commands::Config {
            show,
            api_base,
            username,
            token,
            local_path,
            sweep_interval,
        } => {
            if show {
                handlers::handle_config_show()?;
            } else {
                handlers::handle_config_update(
                    api_base,
                    username,
                    token,
                    local_path,
                    sweep_interval,
                )?;
            }
        }
        Commands::Init {
            api_base,
            username,
            token,
            local_path,
        } => match (username, token, local_path) {
            (Some(username), Some(token), Some(local_path)) => {
                handlers::run_init_from_flags(api_base, username, token, local_path)?;
            }
            _ if !atty::is(atty::Stream::Stdin) => {
                return Err(anyhow::anyhow!(
                    "Not a terminal: pass --username, --token and --local-path"
                ));
            }
            _ => handlers::run_onboarding_flow()?,
        },
        Commands::Quarantine { action } => match action {
            QuarantineAction::List => handlers::handle_quarantine_list()?,
            QuarantineAction::Prune {
                older_than_days,
                dry_run,
            } => handlers::handle_quarantine_prune(older_than_days, dry_run)?,
        },
    }

    Ok(())
}
