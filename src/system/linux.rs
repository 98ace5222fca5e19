use std::{io, path::Path};

use super::{Flushed, PrivilegeElevator, run_command, run_silent_with_output, shell_quote};
use crate::{error::ApplyError, flusher::CacheFlusher};

/// pkexec: the authentication dialog was dismissed.
const PKEXEC_DISMISSED: i32 = 126;
/// pkexec: not authorized, or no authentication agent.
const PKEXEC_NOT_AUTHORIZED: i32 = 127;

pub fn is_superuser() -> bool {
    let (success, output) = run_silent_with_output("id", &["-u"]);
    success && output.trim() == "0"
}

/// The command pkexec runs: copy, chmod, then the flush chain.
pub fn elevated_script(source: &Path, target: &Path, flusher: &CacheFlusher) -> String {
    let source = shell_quote(&source.to_string_lossy());
    let target = shell_quote(&target.to_string_lossy());
    let copy = format!("cp {source} {target} && chmod 644 {target}");
    let chain = flusher.shell_chain();
    if chain.is_empty() {
        copy
    } else {
        format!("{copy} && ({chain})")
    }
}

pub struct PosixPolicyHelper {
    flusher: CacheFlusher,
}

impl PosixPolicyHelper {
    pub fn new(flusher: CacheFlusher) -> Self {
        Self { flusher }
    }

    fn copy_directly(&self, source: &Path, target: &Path) -> Result<Flushed, ApplyError> {
        log::info!("[apply] running as root, copying {}", target.display());
        std::fs::copy(source, target)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(target, std::fs::Permissions::from_mode(0o644))?;
        }
        Ok(Flushed::Pending)
    }

    fn copy_with_pkexec(&self, source: &Path, target: &Path) -> Result<Flushed, ApplyError> {
        let script = elevated_script(source, target, &self.flusher);
        run_policy_helper("pkexec", &script)
    }
}

/// Runs `script` through `helper bash -c`. A missing helper is a refusal.
fn run_policy_helper(helper: &str, script: &str) -> Result<Flushed, ApplyError> {
    log::info!("[apply] spawning: {helper} bash -c {script}");

    let output = run_command(helper, &["bash", "-c", script]).map_err(|error| {
        if error.kind() == io::ErrorKind::NotFound {
            ApplyError::PermissionDenied(format!("{helper} not found"))
        } else {
            ApplyError::Io(error)
        }
    })?;

    match output.code {
        Some(0) => Ok(Flushed::InElevatedStep),
        Some(PKEXEC_DISMISSED | PKEXEC_NOT_AUTHORIZED) => {
            Err(ApplyError::PermissionDenied(output.failure_detail()))
        }
        _ => Err(ApplyError::ProcessFailure(output.failure_detail())),
    }
}

impl PrivilegeElevator for PosixPolicyHelper {
    fn name(&self) -> &str {
        "pkexec"
    }

    fn copy_into_protected_path(
        &self,
        source: &Path,
        target: &Path,
    ) -> Result<Flushed, ApplyError> {
        if is_superuser() {
            self.copy_directly(source, target)
        } else {
            self.copy_with_pkexec(source, target)
        }
    }

    fn flush_caches(&self) {
        self.flusher.flush();
    }
}
