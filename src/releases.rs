use std::time::Duration;

use indicatif::ProgressBar;
use regex::Regex;
use semver::Version;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("tailelec/", env!("CARGO_PKG_VERSION"));
const MAX_ARCHIVE_BYTES: u64 = 256 * 1024 * 1024;

/// Where the package listing, archives and their checksums come from.
pub trait ReleaseSource {
    fn listing(&self) -> Result<String>;
    fn archive(&self, name: &str) -> Result<Vec<u8>>;
    fn checksum(&self, name: &str) -> Result<String>;
}

pub struct HttpSource {
    base: String,
}

impl HttpSource {
    pub fn new(packages_url: &str) -> Self {
        Self {
            base: packages_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{name}", self.base)
    }

    fn fetch(url: &str, limit: u64) -> std::result::Result<Vec<u8>, ureq::Error> {
        ureq::get(url)
            .header("User-Agent", USER_AGENT)
            .call()?
            .body_mut()
            .with_config()
            .limit(limit)
            .read_to_vec()
    }
}

impl ReleaseSource for HttpSource {
    fn listing(&self) -> Result<String> {
        let url = self.url("");
        tracing::debug!(%url, "fetching package listing");

        let bytes = Self::fetch(&url, 8 * 1024 * 1024)
            .map_err(|e| Error::Discovery(format!("failed to fetch {url}: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn archive(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.url(name);
        tracing::debug!(%url, "downloading archive");

        let spinner = ProgressBar::new_spinner();
        spinner.set_message(format!("Downloading {name}..."));
        spinner.enable_steady_tick(Duration::from_millis(80));

        let result = Self::fetch(&url, MAX_ARCHIVE_BYTES);
        spinner.finish_and_clear();

        result.map_err(|e| Error::Transfer {
            url,
            reason: e.to_string(),
        })
    }

    fn checksum(&self, name: &str) -> Result<String> {
        let url = self.url(&format!("{name}.sha256"));

        let bytes = Self::fetch(&url, 64 * 1024).map_err(|e| Error::Transfer {
            url,
            reason: e.to_string(),
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub fn parse_version(tag: &str) -> Option<Version> {
    let version_str = tag.trim();
    let version_str = version_str.strip_prefix('v').unwrap_or(version_str);
    Version::parse(version_str).ok()
}

/// Every version published for `arch` in a package listing.
pub fn parse_versions(listing: &str, arch: &str) -> Vec<Version> {
    let pattern = format!(r"tailscale_(\d+\.\d+\.\d+)_{}\.tgz", regex::escape(arch));
    let Ok(re) = Regex::new(&pattern) else {
        return vec![];
    };

    re.captures_iter(listing)
        .filter_map(|c| parse_version(&c[1]))
        .collect()
}

pub fn latest_version(listing: &str, arch: &str) -> Result<Version> {
    parse_versions(listing, arch)
        .into_iter()
        .max()
        .ok_or_else(|| Error::Discovery(format!("no tailscale_<version>_{arch}.tgz in listing")))
}

pub fn archive_name(version: &Version, arch: &str) -> String {
    format!("tailscale_{version}_{arch}.tgz")
}

pub fn verify_checksum(name: &str, bytes: &[u8], published: &str) -> Result<()> {
    let expected = published
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let actual = format!("{:x}", Sha256::digest(bytes));

    if expected == actual {
        Ok(())
    } else {
        Err(Error::Checksum {
            file: name.to_string(),
            expected,
            actual,
        })
    }
}
