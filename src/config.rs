use std::fs;
use std::path::{Path, PathBuf};

use console::style;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub install_dir: String,
    pub autostart_path: String,
    pub state_dir: String,
    pub packages_url: String,
    pub up_args: Vec<String>,
    pub connect_delay_secs: u64,
    pub watcher: bool,
    pub watch_delay_secs: u64,
    pub watch_interval_secs: u64,
    pub notify_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            install_dir: "~/tailscale".to_string(),
            autostart_path: "~/.config/autostart.sh".to_string(),
            state_dir: "~/.config/tailscale".to_string(),
            packages_url: "https://pkgs.tailscale.com/stable/".to_string(),
            up_args: vec![],
            connect_delay_secs: 10,
            watcher: true,
            watch_delay_secs: 300,
            watch_interval_secs: 86_400,
            notify_url: "http://127.0.0.1:8080/jsonrpc".to_string(),
        }
    }
}

impl Config {
    pub fn install_dir(&self) -> PathBuf {
        PathBuf::from(&self.install_dir)
    }

    pub fn autostart_path(&self) -> PathBuf {
        PathBuf::from(&self.autostart_path)
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(&self.state_dir)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("tailelec.lock")
    }
}

fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("~"))
        .join(".config/tailelec/config.toml")
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        if path == "~" {
            return home;
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

pub fn collapse_tilde(path: &str) -> String {
    if let Some(home) = dirs::home_dir() {
        let home_str = home.to_string_lossy();
        if path == home_str {
            return "~".to_string();
        }
        let prefix = format!("{home_str}/");
        if let Some(rest) = path.strip_prefix(&prefix) {
            return format!("~/{rest}");
        }
    }
    path.to_string()
}

fn path_fields(config: &mut Config) -> [&mut String; 3] {
    [
        &mut config.install_dir,
        &mut config.autostart_path,
        &mut config.state_dir,
    ]
}

fn collapse_paths(config: &mut Config) {
    for path in path_fields(config) {
        *path = collapse_tilde(path);
    }
}

fn expand_paths(config: &mut Config) {
    for path in path_fields(config) {
        *path = expand_tilde(path).to_string_lossy().into_owned();
    }
}

pub fn save_to(config: &Config, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut collapsed = config.clone();
    collapse_paths(&mut collapsed);
    fs::write(path, toml::to_string_pretty(&collapsed)?)?;
    Ok(())
}

pub fn load() -> Result<Config, Box<dyn std::error::Error>> {
    load_from(&config_path())
}

pub fn load_from(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)?;
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "{} failed to parse {}: {e}",
                    style("warning:").yellow().bold(),
                    path.display()
                );
                Config::default()
            }
        }
    } else {
        let config = Config::default();
        save_to(&config, path)?;
        config
    };

    expand_paths(&mut config);
    Ok(config)
}
