//! `syncwatch config`: starter config and inspection.

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use syncwatch_core::config::{config_path_at, load_config_at, save_config_at};
use syncwatch_core::DaemonConfig;

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a starter config.yaml.
    Init(InitArgs),
    /// Print the effective config (defaults applied).
    Show,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        ConfigCommand::Init(args) => {
            let path = config_path_at(&home);
            if path.exists() && !args.force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            let written = save_config_at(&home, &starter_config())
                .context("failed to write starter config")?;
            println!("wrote {}", written.display());
            println!("edit check_command before running `syncwatch daemon start`");
        }
        ConfigCommand::Show => {
            let config = load_config_at(&home).context("failed to load config")?;
            let yaml = serde_yaml::to_string(&config).context("failed to render config YAML")?;
            println!("# {}", config_path_at(&home).display());
            print!("{yaml}");
            if let Err(err) = config.validate() {
                eprintln!("warning: {err}");
            }
        }
    }

    Ok(())
}

/// Defaults plus a check command that always reports zero changes.
fn starter_config() -> DaemonConfig {
    DaemonConfig {
        check_command: vec!["sh".into(), "-c".into(), "echo 0".into()],
        ..DaemonConfig::default()
    }
}
