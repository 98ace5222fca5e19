use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "hostsgate",
    version,
    about = "Toggle DNS redirection by rewriting the hosts file"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Settings file (defaults to the per-user config directory)")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report whether the redirection is currently installed.
    Status {
        #[arg(long, help = "Output machine-readable JSON")]
        json: bool,
    },
    /// Install the override set.
    Connect,
    /// Restore the loopback-only hosts file.
    Disconnect,
    /// Re-fetch the override set while connected.
    Update,
    /// Stay resident, reconcile on a timer and read commands from stdin.
    Run,
    /// Print the effective settings.
    Config {
        #[arg(long, help = "Write the defaults to the settings file")]
        write_default: bool,
    },
}
