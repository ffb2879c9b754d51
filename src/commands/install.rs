use console::style;

use crate::daemon::{Host, Layout};
use crate::installer::{Action, Installer};
use crate::releases::HttpSource;
use crate::{config, platform};

pub fn execute() -> Result<(), Box<dyn std::error::Error>> {
    platform::require_root()?;
    let arch = platform::detect_arch()?;
    let config = config::load()?;

    let binary_path =
        std::env::current_exe().map_err(|e| format!("failed to resolve binary path: {e}"))?;

    println!(
        "{} {}",
        style("Checking for Tailscale releases...").dim(),
        style(format!("({arch})")).dim()
    );

    let source = HttpSource::new(&config.packages_url);
    let report = Installer::new(&config, arch, &source, &Host)
        .watcher_exe(binary_path)
        .run()?;

    match &report.action {
        Action::Install => println!(
            "{} Tailscale {}",
            style("Installed").green().bold(),
            report.latest
        ),
        Action::Update { from } => println!(
            "{} Tailscale {from} -> {}",
            style("Updated").blue().bold(),
            report.latest
        ),
        Action::UpToDate => println!(
            "{}",
            style(format!("Tailscale {} is already up to date.", report.latest)).dim()
        ),
        Action::NewerInstalled { installed } => println!(
            "{}",
            style(format!(
                "Tailscale {installed} is newer than the latest release ({}), leaving it alone.",
                report.latest
            ))
            .dim()
        ),
    }

    if report.reconnected {
        println!(
            "{}",
            style("Daemon restarted, reconnecting in the background.")
                .green()
                .bold()
        );
    }

    for block in &report.blocks_added {
        println!(
            "{} {block} entry to {}",
            style("Added").blue().bold(),
            config.autostart_path
        );
    }

    if report.action == Action::Install && !report.reconnected {
        let cli = Layout::from_config(&config).cli();
        println!(
            "Run {} to log in to your tailnet.",
            style(format!("{} up", cli.display())).bold()
        );
    }

    Ok(())
}
