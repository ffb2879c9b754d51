use std::thread;
use std::time::Duration;

use semver::Version;

use crate::config::{self, Config};
use crate::daemon::{Host, Layout, System};
use crate::error::Result;
use crate::installer::{self, CheckOutcome};
use crate::platform;
use crate::releases::{HttpSource, ReleaseSource};

use super::check;

pub fn execute() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load()?;
    let arch = platform::detect_arch()?;
    let source = HttpSource::new(&config.packages_url);

    tracing::info!(
        delay = config.watch_delay_secs,
        interval = config.watch_interval_secs,
        "watcher started"
    );
    poll(
        &config,
        arch,
        &source,
        &Host,
        |installed, latest| check::announce(&config, installed, latest),
        |pause| {
            thread::sleep(pause);
            true
        },
    );

    Ok(())
}

/// Sleeps for the initial delay, then checks once per interval until
/// `sleep` returns false, or after a single check when the interval is 0.
/// Failed checks are logged and retried on the next round. Each new
/// version is announced once.
pub fn poll(
    config: &Config,
    arch: &str,
    source: &dyn ReleaseSource,
    system: &dyn System,
    mut announce: impl FnMut(&Version, &Version) -> Result<()>,
    mut sleep: impl FnMut(Duration) -> bool,
) {
    let layout = Layout::from_config(config);
    if !sleep(Duration::from_secs(config.watch_delay_secs)) {
        return;
    }

    let mut announced: Option<Version> = None;
    loop {
        match installer::check_for_update(&layout, arch, source, system) {
            Ok(outcome) => {
                check::print(&outcome);
                if let CheckOutcome::UpdateAvailable { installed, latest } = outcome
                    && announced.as_ref() != Some(&latest)
                {
                    match announce(&installed, &latest) {
                        Ok(()) => announced = Some(latest),
                        Err(e) => tracing::warn!(error = %e, "notification failed"),
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "update check failed"),
        }

        if config.watch_interval_secs == 0
            || !sleep(Duration::from_secs(config.watch_interval_secs))
        {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::daemon::testutil::FakeSystem;
    use crate::error::Error;

    /// Serves one queued listing per poll.
    struct Listings(RefCell<VecDeque<Result<String>>>);

    impl Listings {
        fn new(versions: &[Option<&str>]) -> Self {
            let queue = versions
                .iter()
                .map(|v| match v {
                    Some(v) => Ok(format!("<a href=\"tailscale_{v}_amd64.tgz\">x</a>")),
                    None => Err(Error::Discovery("connection refused".to_string())),
                })
                .collect();
            Self(RefCell::new(queue))
        }

        fn remaining(&self) -> usize {
            self.0.borrow().len()
        }
    }

    impl ReleaseSource for Listings {
        fn listing(&self) -> Result<String> {
            self.0
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Discovery("no more listings".to_string())))
        }

        fn archive(&self, _name: &str) -> Result<Vec<u8>> {
            unreachable!("the watcher never downloads")
        }

        fn checksum(&self, _name: &str) -> Result<String> {
            unreachable!("the watcher never downloads")
        }
    }

    fn installed(version: &str) -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let install_dir = dir.path().join("tailscale");
        fs::create_dir_all(&install_dir).unwrap();
        fs::write(install_dir.join("tailscale"), format!("{version}\n")).unwrap();
        fs::write(install_dir.join("tailscaled"), "daemon").unwrap();

        let config = Config {
            install_dir: install_dir.to_string_lossy().into_owned(),
            ..Config::default()
        };
        (dir, config)
    }

    /// Sleeps that succeed `rounds` times, recording each pause.
    fn sleeper(rounds: usize, pauses: &RefCell<Vec<Duration>>) -> impl FnMut(Duration) -> bool {
        move |pause| {
            let mut pauses = pauses.borrow_mut();
            pauses.push(pause);
            pauses.len() <= rounds
        }
    }

    #[test]
    fn keeps_polling_after_failed_check_and_announces_once() {
        let (_dir, config) = installed("1.60.0");
        let source = Listings::new(&[None, Some("1.62.0"), Some("1.62.0"), Some("1.64.0")]);
        let announced = RefCell::new(Vec::new());
        let pauses = RefCell::new(Vec::new());

        poll(
            &config,
            "amd64",
            &source,
            &FakeSystem::default(),
            |installed, latest| {
                announced
                    .borrow_mut()
                    .push((installed.to_string(), latest.to_string()));
                Ok(())
            },
            sleeper(4, &pauses),
        );

        assert_eq!(source.remaining(), 0);
        assert_eq!(
            *announced.borrow(),
            vec![
                ("1.60.0".to_string(), "1.62.0".to_string()),
                ("1.60.0".to_string(), "1.64.0".to_string()),
            ]
        );
        let pauses = pauses.borrow();
        assert_eq!(pauses[0], Duration::from_secs(300));
        assert_eq!(pauses[1], Duration::from_secs(86_400));
    }

    #[test]
    fn failed_announcement_is_retried() {
        let (_dir, config) = installed("1.60.0");
        let source = Listings::new(&[Some("1.62.0"), Some("1.62.0"), Some("1.62.0")]);
        let attempts = RefCell::new(0);
        let pauses = RefCell::new(Vec::new());

        poll(
            &config,
            "amd64",
            &source,
            &FakeSystem::default(),
            |_, _| {
                *attempts.borrow_mut() += 1;
                if *attempts.borrow() == 1 {
                    Err(Error::Notify("connection refused".to_string()))
                } else {
                    Ok(())
                }
            },
            sleeper(3, &pauses),
        );

        assert_eq!(source.remaining(), 0);
        assert_eq!(*attempts.borrow(), 2);
    }

    #[test]
    fn zero_interval_checks_once() {
        let (_dir, mut config) = installed("1.62.0");
        config.watch_interval_secs = 0;
        let source = Listings::new(&[Some("1.62.0"), Some("1.64.0")]);
        let pauses = RefCell::new(Vec::new());

        poll(
            &config,
            "amd64",
            &source,
            &FakeSystem::default(),
            |_, _| panic!("nothing to announce"),
            sleeper(usize::MAX, &pauses),
        );

        assert_eq!(source.remaining(), 1);
        assert_eq!(pauses.borrow().len(), 1);
    }
}
