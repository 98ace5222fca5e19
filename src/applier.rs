use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    document::OverrideDocument,
    error::ApplyError,
    system::{Flushed, PrivilegeElevator},
};

pub struct PrivilegedApplier {
    elevator: Arc<dyn PrivilegeElevator>,
    target: PathBuf,
    settle_delay: Duration,
}

impl PrivilegedApplier {
    pub fn new(elevator: Arc<dyn PrivilegeElevator>, target: PathBuf, settle_delay: Duration) -> Self {
        Self {
            elevator,
            target,
            settle_delay,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Replaces the whole protected file with `document`.
    ///
    /// The content goes to a private temporary file first, which is removed on
    /// every exit path when the guard drops.
    pub fn apply(&self, document: &OverrideDocument) -> Result<(), ApplyError> {
        let mut staged = tempfile::Builder::new()
            .prefix("hostsgate_")
            .suffix(".hosts")
            .tempfile()?;
        staged.write_all(document.as_bytes())?;
        staged.as_file().sync_all()?;

        log::info!(
            "[apply] staged {} bytes at {}, replacing {} via {}",
            document.as_str().len(),
            staged.path().display(),
            self.target.display(),
            self.elevator.name(),
        );

        let flushed = self
            .elevator
            .copy_into_protected_path(staged.path(), &self.target)
            .inspect_err(|error| log::warn!("[apply] {error}"))?;

        if flushed == Flushed::Pending {
            self.elevator.flush_caches();
        }

        std::thread::sleep(self.settle_delay);
        log::info!("[apply] {} replaced", self.target.display());
        Ok(())
    }

    pub fn restore_default(&self) -> Result<(), ApplyError> {
        self.apply(&OverrideDocument::loopback_default())
    }
}
