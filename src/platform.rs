use std::process::Command;

use crate::error::{Error, Result};

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn require_root() -> Result<()> {
    if is_root() { Ok(()) } else { Err(Error::NotRoot) }
}

/// Kernel machine name as reported by `uname -m`.
pub fn machine() -> Result<String> {
    let output = Command::new("uname").arg("-m").output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::UnsupportedArch(format!(
            "uname -m failed: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Maps a machine name to the architecture tag used in Tailscale's
/// static tarball names.
pub fn tarball_arch(machine: &str) -> Result<&'static str> {
    let arch = match machine {
        "x86_64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        "arm" | "armv8l" => "arm",
        m if m.starts_with("armv5") || m.starts_with("armv6") || m.starts_with("armv7") => "arm",
        "i386" | "i486" | "i586" | "i686" => "386",
        other => return Err(Error::UnsupportedArch(other.to_string())),
    };
    Ok(arch)
}

pub fn detect_arch() -> Result<&'static str> {
    tarball_arch(&machine()?)
}
