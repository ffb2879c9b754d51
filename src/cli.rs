use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "tailelec", version)]
#[command(about = "Install Tailscale on LibreELEC, start it at boot and watch for updates")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install or update Tailscale and set up autostart (default)
    Install,
    /// Check once for a newer Tailscale release
    Check {
        /// Only print the result, without a Kodi notification
        #[arg(long)]
        no_notify: bool,
    },
    /// Keep checking for updates in the background
    Watch,
    /// Show installed version, daemon state and autostart entries
    Status,
    /// Stop Tailscale and remove it from autostart
    Uninstall {
        /// Also delete the daemon state (device identity)
        #[arg(long)]
        purge: bool,
    },
}
