use console::style;

use crate::daemon::Host;
use crate::{config, installer, platform};

pub fn execute(purge: bool) -> Result<(), Box<dyn std::error::Error>> {
    platform::require_root()?;
    let config = config::load()?;

    let removal = installer::uninstall(&config, &Host, purge)?;

    if !removal.watchers.is_empty() {
        println!("{}", style("Watcher stopped.").green().bold());
    }
    if !removal.daemons.is_empty() {
        println!("{}", style("Daemon stopped.").green().bold());
    }
    for name in &removal.blocks {
        println!(
            "{} {name} entry from {}",
            style("Removed").green().bold(),
            config.autostart_path
        );
    }
    for dir in [&removal.install_dir, &removal.state_dir].into_iter().flatten() {
        println!("{} {}", style("Removed").green().bold(), dir.display());
    }

    if removal.is_empty() {
        println!("{}", style("Nothing to uninstall.").dim());
    }

    Ok(())
}
