use console::style;

use crate::daemon::{self, Host, Layout, System};
use crate::{autostart, config};

pub fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load()?;
    let layout = Layout::from_config(&config);

    match daemon::installed_version(&layout, &Host) {
        Some(version) => println!("{} {}", style("Tailscale:").bold(), style(version).green()),
        None if layout.is_installed() => println!(
            "{} {}",
            style("Tailscale:").bold(),
            style("installed (unknown version)").yellow()
        ),
        None => println!(
            "{} {}",
            style("Tailscale:").bold(),
            style("not installed").yellow()
        ),
    }

    let pids = Host.daemon_pids();
    if pids.is_empty() {
        println!("{} {}", style("Daemon:").bold(), style("stopped").yellow());
    } else {
        let list = pids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{} {} (pid {list})",
            style("Daemon:").bold(),
            style("running").green()
        );
    }

    let blocks = autostart::installed_blocks(&config.autostart_path())?;
    if blocks.is_empty() {
        println!(
            "{} {}",
            style("Autostart:").bold(),
            style("no tailelec entries").dim()
        );
    } else {
        println!("{} {}", style("Autostart:").bold(), blocks.join(", "));
    }

    Ok(())
}
