//! `syncwatch enable|disable|phase|send`: one-shot requests to a running daemon.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use syncwatch_core::LifecyclePhase;
use syncwatch_daemon::protocol::{Client, Request};
use syncwatch_daemon::DaemonError;

use super::home_dir;

/// Arguments for `syncwatch phase`.
#[derive(Args, Debug)]
pub struct PhaseArgs {
    /// `foreground` (or `active`) / `background` (or `inactive`).
    pub phase: LifecyclePhase,
}

impl PhaseArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        Client::new(&home)
            .call(Request::Phase { phase: self.phase })
            .map_err(not_running_hint)
            .with_context(|| format!("failed to set lifecycle phase to {}", self.phase))?;
        println!("lifecycle phase: {}", self.phase.to_string().bold());
        Ok(())
    }
}

pub fn set_enabled(enabled: bool) -> Result<()> {
    let home = home_dir()?;
    let request = if enabled {
        Request::Enable
    } else {
        Request::Disable
    };
    Client::new(&home)
        .call(request)
        .map_err(not_running_hint)
        .context(if enabled {
            "failed to enable polling"
        } else {
            "failed to disable polling"
        })?;

    if enabled {
        println!("polling {}", "enabled".green().bold());
    } else {
        println!("polling {}", "disabled".yellow().bold());
    }
    Ok(())
}

pub fn send() -> Result<()> {
    let home = home_dir()?;
    Client::new(&home)
        .call(Request::Send)
        .map_err(not_running_hint)
        .context("failed to send local changes")?;
    println!("local changes {}", "sent".green().bold());
    Ok(())
}

fn not_running_hint(err: DaemonError) -> anyhow::Error {
    match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow::Error::new(err).context("start it with `syncwatch daemon start`")
        }
        other => anyhow::Error::new(other),
    }
}
