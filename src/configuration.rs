use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const APP_NAME: &str = "hostsgate";

#[cfg(target_os = "windows")]
pub const DEFAULT_HOSTS_PATH: &str = r"C:\Windows\System32\drivers\etc\hosts";

#[cfg(not(target_os = "windows"))]
pub const DEFAULT_HOSTS_PATH: &str = "/etc/hosts";

pub const DEFAULT_PRIMARY_URL: &str =
    "https://raw.githubusercontent.com/ImMALWARE/dns.malw.link/refs/heads/master/hosts";
pub const DEFAULT_SECONDARY_URL: &str = "https://raw.githubusercontent.com/AvenCores/Goida-AI-Unlocker/refs/heads/main/additional_hosts.py";
pub const DEFAULT_BLOCK_OPEN_MARKER: &str = "hosts_add = \"\"\"";
pub const DEFAULT_BLOCK_CLOSE_MARKER: &str = "\"\"\"";
pub const DEFAULT_SIGNATURE: &str = "dns.malw.link";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_INSTANCE_KEY: &str = "hostsgate_instance_v1";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_primary_url")]
    pub primary_url: String,
    #[serde(default = "default_secondary_url")]
    pub secondary_url: String,
    #[serde(default = "default_block_open_marker")]
    pub block_open_marker: String,
    #[serde(default = "default_block_close_marker")]
    pub block_close_marker: String,
    #[serde(default = "default_signature")]
    pub signature: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_hosts_path")]
    pub hosts_path: PathBuf,
    #[serde(default = "default_instance_key")]
    pub instance_key: String,
}

fn default_primary_url() -> String {
    DEFAULT_PRIMARY_URL.into()
}

fn default_secondary_url() -> String {
    DEFAULT_SECONDARY_URL.into()
}

fn default_block_open_marker() -> String {
    DEFAULT_BLOCK_OPEN_MARKER.into()
}

fn default_block_close_marker() -> String {
    DEFAULT_BLOCK_CLOSE_MARKER.into()
}

fn default_signature() -> String {
    DEFAULT_SIGNATURE.into()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_hosts_path() -> PathBuf {
    PathBuf::from(DEFAULT_HOSTS_PATH)
}

fn default_instance_key() -> String {
    DEFAULT_INSTANCE_KEY.into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            secondary_url: default_secondary_url(),
            block_open_marker: default_block_open_marker(),
            block_close_marker: default_block_close_marker(),
            signature: default_signature(),
            user_agent: default_user_agent(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            hosts_path: default_hosts_path(),
            instance_key: default_instance_key(),
        }
    }
}

impl Settings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Missing or unparseable files fall back to defaults.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(settings) => {
                log::info!("[configuration] loaded from {}", path.display());
                settings
            }
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                log::info!(
                    "[configuration] no settings file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
            Err(error) => {
                log::warn!("[configuration] {error}, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && let Err(error) = std::fs::create_dir_all(parent)
        {
            log::warn!(
                "[configuration] failed to create directory {}: {error}",
                parent.display()
            );
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("[configuration] saved to {}", path.display());
        Ok(())
    }
}

pub fn configuration_directory() -> PathBuf {
    let directory = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME);
    if let Err(error) = std::fs::create_dir_all(&directory) {
        log::warn!(
            "[configuration] failed to create configuration directory {}: {error}",
            directory.display()
        );
    }
    directory
}

pub fn settings_file_path() -> PathBuf {
    configuration_directory().join(format!("{APP_NAME}.toml"))
}
