use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{Error, Result};

fn extract_err(e: std::io::Error) -> Error {
    Error::Extract(e.to_string())
}

/// Unpacks a gzipped tarball into `dest`, dropping the first path
/// component of every entry. Returns the relative paths of the regular
/// files written.
pub fn unpack_stripped(bytes: &[u8], dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut files = Vec::new();

    for entry in archive.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let path = entry.path().map_err(extract_err)?.into_owned();

        let stripped: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .skip(1)
            .collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        if stripped
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Extract(format!(
                "unsafe path in archive: {}",
                path.display()
            )));
        }

        let target = dest.join(&stripped);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let is_file = entry.header().entry_type().is_file();
        entry.unpack(&target).map_err(extract_err)?;
        if is_file {
            files.push(stripped);
        }
    }

    Ok(files)
}

/// An archive unpacked next to the install dir, checked and ready to be
/// moved into place.
pub struct Staged {
    dir: tempfile::TempDir,
    install_dir: PathBuf,
    files: Vec<PathBuf>,
}

/// Extracts `bytes` into a staging dir inside `install_dir`. Each name in
/// `executables` must be present and ends up mode 0755. Nothing outside the
/// staging dir is touched.
pub fn stage(bytes: &[u8], install_dir: &Path, executables: &[&str]) -> Result<Staged> {
    fs::create_dir_all(install_dir)?;

    let dir = tempfile::Builder::new()
        .prefix(".tailelec-")
        .tempdir_in(install_dir)?;
    let mut files = unpack_stripped(bytes, dir.path())?;

    for name in executables {
        if !files.iter().any(|f| f == Path::new(name)) {
            return Err(Error::Extract(format!("archive is missing {name}")));
        }
        fs::set_permissions(dir.path().join(name), fs::Permissions::from_mode(0o755))?;
    }

    // executables go last, in the order given
    files.retain(|f| !executables.iter().any(|e| f == Path::new(e)));
    files.extend(executables.iter().map(PathBuf::from));

    Ok(Staged {
        dir,
        install_dir: install_dir.to_path_buf(),
        files,
    })
}

impl Staged {
    /// Renames every staged file into the install dir. The last executable
    /// is renamed last, so a failure part way leaves it at its old version.
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        for file in &self.files {
            let target = self.install_dir.join(file);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(self.dir.path().join(file), &target)?;
        }
        Ok(self.files)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EXECUTABLES: [&str; 2] = ["tailscale", "tailscaled"];

    fn install(bytes: &[u8], install_dir: &Path, executables: &[&str]) -> Result<Vec<PathBuf>> {
        stage(bytes, install_dir, executables)?.commit()
    }

    #[test]
    fn strips_wrapping_directory() {
        let dir = TempDir::new().unwrap();
        let bytes = testutil::tgz(&[
            ("tailscale_1.2.3_arm/tailscale", "cli"),
            ("tailscale_1.2.3_arm/systemd/tailscaled.service", "[Unit]"),
        ]);

        let files = unpack_stripped(&bytes, dir.path()).unwrap();

        assert_eq!(
            files,
            vec![
                PathBuf::from("tailscale"),
                PathBuf::from("systemd/tailscaled.service")
            ]
        );
        assert_eq!(fs::read_to_string(dir.path().join("tailscale")).unwrap(), "cli");
        assert!(!dir.path().join("tailscale_1.2.3_arm").exists());
    }

    #[test]
    fn install_marks_binaries_executable() {
        let dir = TempDir::new().unwrap();
        let install_dir = dir.path().join("tailscale");
        let bytes = testutil::tgz(&[
            ("tailscale_1.2.3_arm/tailscale", "cli"),
            ("tailscale_1.2.3_arm/tailscaled", "daemon"),
        ]);

        install(&bytes, &install_dir, &EXECUTABLES).unwrap();

        for name in EXECUTABLES {
            let mode = fs::metadata(install_dir.join(name))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755, "{name}");
        }
    }

    #[test]
    fn install_replaces_existing_binaries_and_cleans_staging() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tailscaled"), b"old").unwrap();
        let bytes = testutil::tgz(&[
            ("tailscale_1.2.4_arm/tailscale", "cli"),
            ("tailscale_1.2.4_arm/tailscaled", "new"),
        ]);

        install(&bytes, dir.path(), &EXECUTABLES).unwrap();

        assert_eq!(fs::read(dir.path().join("tailscaled")).unwrap(), b"new");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tailelec-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn install_rejects_archive_without_daemon() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tailscaled"), b"old").unwrap();
        let bytes = testutil::tgz(&[("tailscale_1.2.3_arm/tailscale", "cli")]);

        let err = install(&bytes, dir.path(), &EXECUTABLES).unwrap_err();

        assert!(matches!(err, Error::Extract(ref m) if m.contains("tailscaled")));
        assert_eq!(fs::read(dir.path().join("tailscaled")).unwrap(), b"old");
    }

    #[test]
    fn staging_leaves_install_dir_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tailscaled"), b"old").unwrap();
        let bytes = testutil::tgz(&[
            ("tailscale_1.2.4_arm/tailscale", "cli"),
            ("tailscale_1.2.4_arm/tailscaled", "new"),
        ]);

        let staged = stage(&bytes, dir.path(), &EXECUTABLES).unwrap();

        assert_eq!(fs::read(dir.path().join("tailscaled")).unwrap(), b"old");
        assert!(!dir.path().join("tailscale").exists());
        drop(staged);
    }

    #[test]
    fn commit_moves_daemon_last() {
        let dir = TempDir::new().unwrap();
        let bytes = testutil::tgz(&[
            ("tailscale_1.2.4_arm/tailscaled", "new"),
            ("tailscale_1.2.4_arm/README.md", "docs"),
            ("tailscale_1.2.4_arm/tailscale", "cli"),
        ]);

        let files = install(&bytes, dir.path(), &EXECUTABLES).unwrap();

        assert_eq!(
            files,
            vec![
                PathBuf::from("README.md"),
                PathBuf::from("tailscale"),
                PathBuf::from("tailscaled")
            ]
        );
    }

    #[test]
    fn failed_commit_keeps_old_daemon() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tailscaled"), b"old").unwrap();
        fs::create_dir(dir.path().join("tailscale")).unwrap();
        fs::write(dir.path().join("tailscale/blocker"), b"").unwrap();
        let bytes = testutil::tgz(&[
            ("tailscale_1.2.4_arm/tailscale", "cli"),
            ("tailscale_1.2.4_arm/tailscaled", "new"),
        ]);

        assert!(install(&bytes, dir.path(), &EXECUTABLES).is_err());
        assert_eq!(fs::read(dir.path().join("tailscaled")).unwrap(), b"old");
    }

    #[test]
    fn rejects_corrupt_archive() {
        let dir = TempDir::new().unwrap();

        let err = unpack_stripped(b"this is not gzip", dir.path()).unwrap_err();

        assert!(matches!(err, Error::Extract(_)));
    }
}
