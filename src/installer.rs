use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use semver::Version;

use crate::config::Config;
use crate::daemon::{self, Layout, System};
use crate::error::{Error, Result};
use crate::releases::{self, ReleaseSource};
use crate::{archive, autostart};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Install,
    Update { from: Version },
    UpToDate,
    NewerInstalled { installed: Version },
}

impl Action {
    pub fn replaces_binaries(&self) -> bool {
        matches!(self, Self::Install | Self::Update { .. })
    }
}

/// Equal versions are a no-op; a missing or older install proceeds. A newer
/// local build is never downgraded.
pub fn decide(installed: Option<&Version>, latest: &Version) -> Action {
    match installed {
        None => Action::Install,
        Some(v) if v < latest => Action::Update { from: v.clone() },
        Some(v) if v == latest => Action::UpToDate,
        Some(v) => Action::NewerInstalled {
            installed: v.clone(),
        },
    }
}

#[derive(Debug)]
pub struct Report {
    pub latest: Version,
    pub action: Action,
    /// A daemon was running before the binaries were replaced and has been
    /// relaunched together with `tailscale up`.
    pub reconnected: bool,
    pub blocks_added: Vec<&'static str>,
}

pub fn acquire_lock(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    file.try_lock_exclusive()
        .map_err(|_| Error::Locked(path.to_path_buf()))?;
    Ok(file)
}

pub struct Installer<'a> {
    config: &'a Config,
    layout: Layout,
    arch: &'a str,
    source: &'a dyn ReleaseSource,
    system: &'a dyn System,
    watcher_exe: Option<PathBuf>,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a Config,
        arch: &'a str,
        source: &'a dyn ReleaseSource,
        system: &'a dyn System,
    ) -> Self {
        Self {
            config,
            layout: Layout::from_config(config),
            arch,
            source,
            system,
            watcher_exe: None,
        }
    }

    /// Binary copied into the install dir for the watcher block to run.
    pub fn watcher_exe(mut self, path: PathBuf) -> Self {
        self.watcher_exe = Some(path);
        self
    }

    pub fn run(&self) -> Result<Report> {
        let _lock = acquire_lock(&self.config.lock_path())?;

        let listing = self.source.listing()?;
        let latest = releases::latest_version(&listing, self.arch)?;
        let installed = daemon::installed_version(&self.layout, self.system);
        let action = decide(installed.as_ref(), &latest);
        tracing::info!(%latest, ?installed, ?action, "version check");

        let reconnected = if action.replaces_binaries() {
            self.replace_binaries(&latest)?
        } else {
            false
        };

        let mut blocks_added = self.patch_autostart()?;
        if self.config.watcher && self.install_watcher()? {
            blocks_added.push(autostart::WATCHER_BLOCK);
        }

        Ok(Report {
            latest,
            action,
            reconnected,
            blocks_added,
        })
    }

    fn download(&self, version: &Version) -> Result<Vec<u8>> {
        let name = releases::archive_name(version, self.arch);
        let bytes = self.source.archive(&name)?;
        let published = self.source.checksum(&name)?;
        releases::verify_checksum(&name, &bytes, &published)?;
        Ok(bytes)
    }

    /// Returns whether a running daemon was stopped and reconnected.
    ///
    /// The archive is fully unpacked and checked before the daemon is
    /// stopped. Once it has been stopped it is always relaunched, even when
    /// the swap fails and the old binaries are still in place.
    fn replace_binaries(&self, version: &Version) -> Result<bool> {
        let bytes = self.download(version)?;
        let staged = archive::stage(&bytes, &self.layout.install_dir, &daemon::BINARIES)?;

        let pids = self.system.daemon_pids();
        let was_running = !pids.is_empty();
        let swapped = if was_running {
            self.system.terminate(&pids)
        } else {
            Ok(())
        }
        .and_then(|()| staged.commit());

        if let Err(e) = swapped {
            if was_running {
                tracing::warn!(error = %e, "replacing binaries failed, relaunching daemon");
                if let Err(relaunch) = self.relaunch(true) {
                    tracing::error!(error = %relaunch, "relaunching daemon failed");
                }
            }
            return Err(e);
        }
        tracing::info!(%version, dir = %self.layout.install_dir.display(), "binaries installed");

        self.relaunch(was_running)?;
        Ok(was_running)
    }

    fn relaunch(&self, reconnect: bool) -> Result<()> {
        self.system.run_shell(&daemon::launch_command(&self.layout))?;
        if reconnect {
            self.system.run_shell(&daemon::connect_command(
                &self.layout,
                self.config.connect_delay_secs,
                &self.config.up_args,
            ))?;
        }
        Ok(())
    }

    fn patch_autostart(&self) -> Result<Vec<&'static str>> {
        let path = self.config.autostart_path();
        autostart::ensure_script(&path)?;

        let blocks = [
            (autostart::DAEMON_BLOCK, daemon::launch_command(&self.layout)),
            (
                autostart::CONNECT_BLOCK,
                daemon::connect_command(
                    &self.layout,
                    self.config.connect_delay_secs,
                    &self.config.up_args,
                ),
            ),
        ];

        let mut added = Vec::new();
        for (name, body) in blocks {
            if autostart::append_block(&path, name, &body)? {
                added.push(name);
            }
        }
        Ok(added)
    }

    fn watcher_command(&self, exe: &Path) -> String {
        format!(
            "{} watch > {} 2>&1 &",
            daemon::shell_quote(&exe.to_string_lossy()),
            daemon::shell_quote(&self.layout.state_dir.join("tailelec-watch.log").to_string_lossy()),
        )
    }

    /// Refreshes the installed copy of this tool and appends the watcher
    /// block. Returns whether the block was added.
    fn install_watcher(&self) -> Result<bool> {
        let target = self.layout.install_dir.join(daemon::WATCHER);

        if let Some(source) = &self.watcher_exe {
            copy_executable(source, &target)?;
        }
        if !target.exists() {
            tracing::warn!(path = %target.display(), "no watcher binary, skipping watcher");
            return Ok(false);
        }

        autostart::append_block(
            &self.config.autostart_path(),
            autostart::WATCHER_BLOCK,
            &self.watcher_command(&target),
        )
    }
}

fn copy_executable(source: &Path, target: &Path) -> Result<()> {
    if let (Ok(a), Ok(b)) = (fs::canonicalize(source), fs::canonicalize(target))
        && a == b
    {
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = target.with_extension("new");
    fs::copy(source, &temp)?;
    fs::set_permissions(&temp, fs::Permissions::from_mode(0o755))?;
    fs::rename(&temp, target)?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    NotInstalled { latest: Version },
    UpToDate { installed: Version },
    UpdateAvailable { installed: Version, latest: Version },
}

/// One watcher poll: compares the installed version with the listing.
pub fn check_for_update(
    layout: &Layout,
    arch: &str,
    source: &dyn ReleaseSource,
    system: &dyn System,
) -> Result<CheckOutcome> {
    let latest = releases::latest_version(&source.listing()?, arch)?;

    let outcome = match daemon::installed_version(layout, system) {
        None => CheckOutcome::NotInstalled { latest },
        Some(installed) if installed < latest => {
            CheckOutcome::UpdateAvailable { installed, latest }
        }
        Some(installed) => CheckOutcome::UpToDate { installed },
    };
    Ok(outcome)
}

/// What `uninstall` found and removed.
#[derive(Debug, Default)]
pub struct Removal {
    pub watchers: Vec<u32>,
    pub daemons: Vec<u32>,
    pub blocks: Vec<&'static str>,
    pub install_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

impl Removal {
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
            && self.daemons.is_empty()
            && self.blocks.is_empty()
            && self.install_dir.is_none()
            && self.state_dir.is_none()
    }
}

/// Stops the watcher and the daemon, strips every tailelec block from the
/// autostart script and deletes the binaries. `purge` also deletes the
/// daemon state, which holds the device identity.
pub fn uninstall(config: &Config, system: &dyn System, purge: bool) -> Result<Removal> {
    let _lock = acquire_lock(&config.lock_path())?;
    let layout = Layout::from_config(config);
    let mut removal = Removal::default();

    removal.watchers = system.watcher_pids();
    if !removal.watchers.is_empty() {
        system.terminate(&removal.watchers)?;
    }
    removal.daemons = system.daemon_pids();
    if !removal.daemons.is_empty() {
        system.terminate(&removal.daemons)?;
    }

    removal.blocks = autostart::remove_blocks(&config.autostart_path())?;

    if layout.install_dir.exists() {
        fs::remove_dir_all(&layout.install_dir)?;
        removal.install_dir = Some(layout.install_dir);
    }
    if purge && layout.state_dir.exists() {
        fs::remove_dir_all(&layout.state_dir)?;
        removal.state_dir = Some(layout.state_dir);
    }

    tracing::info!(?removal, "uninstalled");
    Ok(removal)
}
