//! `syncwatch daemon`: foreground runtime and socket queries.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use syncwatch_daemon::protocol::{Client, Request};
use syncwatch_daemon::runtime::start_blocking;
use syncwatch_daemon::DaemonError;

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (coordinator + socket server).
    Start(StartArgs),
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long)]
    pub log_json: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;
    let client = Client::new(&home);

    match command {
        DaemonCommand::Start(args) => {
            start_blocking(&home, args.log_json).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match client.call(Request::Stop) {
            Ok(_) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match client.status() {
                Ok(status) => serde_json::to_value(status)?,
                Err(DaemonError::DaemonNotRunning { socket }) => serde_json::json!({
                    "running": false,
                    "socket": socket,
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
    }

    Ok(())
}
