use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

/// `true` iff `signature` occurs in `content`.
pub fn contains_signature(content: &str, signature: &str) -> bool {
    content.contains(signature)
}

/// Reads the hosts file on every call; nothing is cached.
#[derive(Clone, Debug)]
pub struct StatusOracle {
    path: PathBuf,
    signature: String,
}

impl StatusOracle {
    pub fn new(path: PathBuf, signature: impl Into<String>) -> Self {
        Self {
            path,
            signature: signature.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unreadable or missing files count as inactive.
    pub fn is_active(&self) -> bool {
        match std::fs::read(&self.path) {
            Ok(bytes) => contains_signature(&String::from_utf8_lossy(&bytes), &self.signature),
            Err(error) => {
                log::debug!("[status] cannot read {}: {error}", self.path.display());
                false
            }
        }
    }

    /// Modification time of the hosts file while the signature is present.
    pub fn connected_since(&self) -> Option<SystemTime> {
        if !self.is_active() {
            return None;
        }
        std::fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .ok()
    }

    pub fn uptime(&self) -> Option<Duration> {
        let since = self.connected_since()?;
        Some(SystemTime::now().duration_since(since).unwrap_or_default())
    }
}

pub fn format_uptime(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
