use std::io;
use std::path::PathBuf;

use console::{StyledObject, style};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("this command must be run as root")]
    NotRoot,

    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    #[error("failed to discover the latest version: {0}")]
    Discovery(String),

    #[error("failed to download {url}: {reason}")]
    Transfer { url: String, reason: String },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    Checksum {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("failed to extract archive: {0}")]
    Extract(String),

    #[error("failed to send notification: {0}")]
    Notify(String),

    #[error("another tailelec run holds {}", .0.display())]
    Locked(PathBuf),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Colored label printed in front of the message on stderr.
    pub fn label(&self) -> StyledObject<&'static str> {
        match self {
            Self::NotRoot => style("permission error:").red().bold(),
            Self::UnsupportedArch(_) => style("platform error:").magenta().bold(),
            Self::Discovery(_) | Self::Transfer { .. } | Self::Notify(_) => {
                style("network error:").cyan().bold()
            }
            _ => style("error:").red().bold(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
