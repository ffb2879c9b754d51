use console::style;
use semver::Version;

use crate::config::{self, Config};
use crate::daemon::{Host, Layout};
use crate::error::Result;
use crate::installer::{self, CheckOutcome};
use crate::releases::HttpSource;
use crate::{notify, platform};

const TITLE: &str = "Tailscale update available";
const DISPLAY_MS: u64 = 10_000;

pub fn execute(notify: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load()?;
    let arch = platform::detect_arch()?;
    let source = HttpSource::new(&config.packages_url);

    let outcome =
        installer::check_for_update(&Layout::from_config(&config), arch, &source, &Host)?;
    print(&outcome);

    if notify && let CheckOutcome::UpdateAvailable { installed, latest } = &outcome {
        announce(&config, installed, latest)?;
    }

    Ok(())
}

pub fn update_message(installed: &Version, latest: &Version) -> String {
    format!("Version {latest} is available (installed: {installed}). Run tailelec to update.")
}

pub fn print(outcome: &CheckOutcome) {
    match outcome {
        CheckOutcome::NotInstalled { latest } => println!(
            "{}",
            style(format!("Tailscale is not installed (latest: {latest}).")).dim()
        ),
        CheckOutcome::UpToDate { installed } => println!(
            "{}",
            style(format!("Tailscale {installed} is up to date.")).dim()
        ),
        CheckOutcome::UpdateAvailable { installed, latest } => println!(
            "{} {installed} -> {latest}",
            style("Update available").yellow().bold()
        ),
    }
}

/// Shows the available update in the Kodi GUI.
pub fn announce(config: &Config, installed: &Version, latest: &Version) -> Result<()> {
    notify::show(
        &config.notify_url,
        TITLE,
        &update_message(installed, latest),
        DISPLAY_MS,
    )
}
