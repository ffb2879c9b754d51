use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use semver::Version;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::releases;

pub const CLI: &str = "tailscale";
pub const DAEMON: &str = "tailscaled";
pub const BINARIES: [&str; 2] = [CLI, DAEMON];
/// Name of this tool's own binary, as run by the watcher block.
pub const WATCHER: &str = "tailelec";

/// How long a stopped process gets before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// On-disk locations of the Tailscale binaries and daemon state.
#[derive(Debug, Clone)]
pub struct Layout {
    pub install_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Layout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            install_dir: config.install_dir(),
            state_dir: config.state_dir(),
        }
    }

    pub fn cli(&self) -> PathBuf {
        self.install_dir.join(CLI)
    }

    pub fn daemon(&self) -> PathBuf {
        self.install_dir.join(DAEMON)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("tailscaled.state")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("tailscaled.log")
    }

    /// The daemon binary is the only thing that counts as "installed".
    pub fn is_installed(&self) -> bool {
        self.daemon().exists()
    }
}

pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// Shell line starting `tailscaled` in the background.
pub fn launch_command(layout: &Layout) -> String {
    format!(
        "mkdir -p {dir} && {daemon} --state={state} --statedir={dir} > {log} 2>&1 &",
        dir = quote_path(&layout.state_dir),
        daemon = quote_path(&layout.daemon()),
        state = quote_path(&layout.state_file()),
        log = quote_path(&layout.log_file()),
    )
}

/// Shell line running `tailscale up` once the daemon had time to start.
pub fn connect_command(layout: &Layout, delay_secs: u64, up_args: &[String]) -> String {
    let mut up = format!("{} up", quote_path(&layout.cli()));
    for arg in up_args {
        up.push(' ');
        up.push_str(&shell_quote(arg));
    }
    format!("(sleep {delay_secs}; {up} > /dev/null 2>&1) &")
}

/// Process and binary access the sequencer needs from the host.
pub trait System {
    fn daemon_pids(&self) -> Vec<u32>;
    /// Other running `tailelec watch` processes.
    fn watcher_pids(&self) -> Vec<u32>;
    /// SIGTERM, then SIGKILL whatever is left after [`STOP_GRACE`].
    fn terminate(&self, pids: &[u32]) -> Result<()>;
    /// Runs a short shell script to completion; background jobs it starts
    /// outlive it.
    fn run_shell(&self, script: &str) -> Result<()>;
    fn binary_version(&self, path: &Path) -> Option<Version>;
}

pub struct Host;

fn pids_named(proc_root: &Path, name: &str) -> Vec<u32> {
    let Ok(entries) = fs::read_dir(proc_root) else {
        return vec![];
    };

    let mut pids: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| {
            let pid = entry.file_name().to_str()?.parse::<u32>().ok()?;
            let comm = fs::read_to_string(entry.path().join("comm")).ok()?;
            (comm.trim_end() == name).then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids
}

fn runs_watch(proc_root: &Path, pid: u32) -> bool {
    let Ok(cmdline) = fs::read(proc_root.join(pid.to_string()).join("cmdline")) else {
        return false;
    };
    cmdline.split(|&b| b == 0).nth(1) == Some(b"watch".as_slice())
}

fn watchers_in(proc_root: &Path, own: u32) -> Vec<u32> {
    pids_named(proc_root, WATCHER)
        .into_iter()
        .filter(|&pid| pid != own && runs_watch(proc_root, pid))
        .collect()
}

#[allow(clippy::cast_possible_wrap)]
fn signal(pid: u32, sig: libc::c_int) -> Result<bool> {
    if unsafe { libc::kill(pid as libc::pid_t, sig) } == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err.into())
    }
}

impl System for Host {
    fn daemon_pids(&self) -> Vec<u32> {
        pids_named(Path::new("/proc"), DAEMON)
    }

    fn watcher_pids(&self) -> Vec<u32> {
        watchers_in(Path::new("/proc"), std::process::id())
    }

    fn terminate(&self, pids: &[u32]) -> Result<()> {
        for &pid in pids {
            tracing::info!(pid, "sending SIGTERM");
            signal(pid, libc::SIGTERM)?;
        }

        let deadline = Instant::now() + STOP_GRACE;
        let mut alive: Vec<u32> = pids.to_vec();
        while !alive.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(200));
            alive.retain(|&pid| signal(pid, 0).unwrap_or(false));
        }

        for pid in alive {
            tracing::warn!(pid, "process did not exit in time, sending SIGKILL");
            signal(pid, libc::SIGKILL)?;
        }

        Ok(())
    }

    fn run_shell(&self, script: &str) -> Result<()> {
        tracing::debug!(script, "running shell");

        let status = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Io(std::io::Error::other(format!(
                "shell exited with {status}: {script}"
            ))))
        }
    }

    fn binary_version(&self, path: &Path) -> Option<Version> {
        let output = Command::new(path).arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        releases::parse_version(stdout.lines().next()?)
    }
}

/// Version reported by the installed CLI, or `None` when the daemon binary
/// is missing, whatever the CLI would report.
pub fn installed_version(layout: &Layout, system: &dyn System) -> Option<Version> {
    if !layout.is_installed() {
        return None;
    }
    system.binary_version(&layout.cli())
}


#[cfg(test)]
mod tests {
    use super::testutil::FakeSystem;
    use super::*;
    use tempfile::TempDir;

    fn layout() -> Layout {
        Layout {
            install_dir: PathBuf::from("/storage/tailscale"),
            state_dir: PathBuf::from("/storage/.config/tailscale"),
        }
    }

    #[test]
    fn launch_command_passes_state_paths() {
        let cmd = launch_command(&layout());

        assert!(cmd.starts_with("mkdir -p '/storage/.config/tailscale' && "));
        assert!(cmd.contains("'/storage/tailscale/tailscaled'"));
        assert!(cmd.contains("--state='/storage/.config/tailscale/tailscaled.state'"));
        assert!(cmd.contains("--statedir='/storage/.config/tailscale'"));
        assert!(cmd.ends_with(" 2>&1 &"));
    }

    #[test]
    fn connect_command_delays_and_quotes_args() {
        let args = vec!["--ssh".to_string(), "--hostname=kodi's box".to_string()];

        let cmd = connect_command(&layout(), 15, &args);

        assert_eq!(
            cmd,
            r"(sleep 15; '/storage/tailscale/tailscale' up '--ssh' '--hostname=kodi'\''s box' > /dev/null 2>&1) &"
        );
    }

    #[test]
    fn shell_quote_wraps_plain_values() {
        assert_eq!(shell_quote("/storage/tailscale"), "'/storage/tailscale'");
    }

    #[test]
    fn finds_pids_by_comm() {
        let proc_root = TempDir::new().unwrap();
        for (pid, comm) in [("12", "tailscaled\n"), ("7", "kodi.bin\n"), ("40", "tailscaled\n")] {
            let dir = proc_root.path().join(pid);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("comm"), comm).unwrap();
        }
        fs::create_dir(proc_root.path().join("self")).unwrap();

        assert_eq!(pids_named(proc_root.path(), DAEMON), vec![12, 40]);
    }

    #[test]
    fn watchers_need_the_watch_argument() {
        let proc_root = TempDir::new().unwrap();
        for (pid, cmdline) in [
            ("20", "/storage/tailscale/tailelec\0watch\0"),
            ("21", "tailelec\0uninstall\0--purge\0"),
            ("22", "tailelec\0"),
            ("23", "/storage/tailscale/tailelec\0watch\0"),
        ] {
            let dir = proc_root.path().join(pid);
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("comm"), "tailelec\n").unwrap();
            fs::write(dir.join("cmdline"), cmdline).unwrap();
        }

        assert_eq!(watchers_in(proc_root.path(), 23), vec![20]);
    }

    #[test]
    fn missing_daemon_means_not_installed_even_with_cli() {
        let dir = TempDir::new().unwrap();
        let layout = Layout {
            install_dir: dir.path().to_path_buf(),
            state_dir: dir.path().join("state"),
        };
        fs::write(layout.cli(), "1.50.0\n").unwrap();

        assert!(!layout.is_installed());
        assert_eq!(installed_version(&layout, &FakeSystem::default()), None);
    }

    #[test]
    fn installed_version_reads_cli_first_line() {
        let dir = TempDir::new().unwrap();
        let layout = Layout {
            install_dir: dir.path().to_path_buf(),
            state_dir: dir.path().join("state"),
        };
        fs::write(layout.cli(), "1.76.1\n  tailscale commit: abc\n").unwrap();
        fs::write(layout.daemon(), "").unwrap();

        assert_eq!(
            installed_version(&layout, &FakeSystem::default()),
            Some(Version::new(1, 76, 1))
        );
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn host_runs_shell_to_completion() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");

        Host.run_shell(&format!("touch {}", quote_path(&marker)))
            .unwrap();

        assert!(marker.exists());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn host_reports_failing_shell() {
        assert!(Host.run_shell("exit 3").is_err());
    }
}
