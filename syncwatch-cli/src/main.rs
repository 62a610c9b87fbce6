//! syncwatch: adaptive remote-change polling daemon and its controls.
//!
//! # Usage
//!
//! ```text
//! syncwatch daemon start [--log-json]
//! syncwatch daemon stop|status
//! syncwatch enable|disable
//! syncwatch phase <foreground|background>
//! syncwatch send
//! syncwatch config init [--force]
//! syncwatch config show
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, control::PhaseArgs, daemon::DaemonCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "syncwatch",
    version,
    about = "Poll a sync collaborator for remote changes and refresh consumers",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or query the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Start polling for remote changes.
    Enable,

    /// Stop polling; an in-flight check finishes without notifying.
    Disable,

    /// Tell the daemon whether the host is in the foreground or background.
    Phase(PhaseArgs),

    /// Push local changes through the configured send command.
    Send,

    /// Create or inspect ~/.syncwatch/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Enable => commands::control::set_enabled(true),
        Commands::Disable => commands::control::set_enabled(false),
        Commands::Phase(args) => args.run(),
        Commands::Send => commands::control::send(),
        Commands::Config { command } => commands::config::run(command),
    }
}
