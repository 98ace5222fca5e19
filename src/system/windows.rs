use std::path::Path;

use super::{Flushed, PrivilegeElevator, powershell_quote, run_command};
use crate::{error::ApplyError, flusher::CacheFlusher};

const POWERSHELL_ARGS: &[&str] = &[
    "-NoProfile",
    "-NonInteractive",
    "-WindowStyle",
    "Hidden",
    "-ExecutionPolicy",
    "Bypass",
];

mod win32 {
    use windows::{
        Win32::{
            Foundation::{CloseHandle, ERROR_CANCELLED},
            System::Threading::{GetExitCodeProcess, INFINITE, WaitForSingleObject},
            UI::Shell::{SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW, ShellExecuteExW},
        },
        core::PCWSTR,
    };

    pub enum RunasError {
        Cancelled,
        Failed(String),
    }

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    /// Starts `file` through the UAC "runas" verb, hidden, and blocks until it exits.
    pub fn shell_execute_runas_and_wait(file: &str, args: &str) -> Result<u32, RunasError> {
        let verb = to_wide("runas");
        let file_wide = to_wide(file);
        let args_wide = to_wide(args);

        let mut info = SHELLEXECUTEINFOW {
            cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
            fMask: SEE_MASK_NOCLOSEPROCESS,
            lpVerb: PCWSTR(verb.as_ptr()),
            lpFile: PCWSTR(file_wide.as_ptr()),
            lpParameters: PCWSTR(args_wide.as_ptr()),
            nShow: 0, // SW_HIDE
            ..Default::default()
        };

        if let Err(error) = unsafe { ShellExecuteExW(&mut info) } {
            log::warn!("[win32] ShellExecuteExW failed: {error}");
            if error.code() == ERROR_CANCELLED.to_hresult() {
                return Err(RunasError::Cancelled);
            }
            return Err(RunasError::Failed(error.message()));
        }

        if info.hProcess.is_invalid() {
            return Err(RunasError::Failed("no process handle returned".into()));
        }

        let mut exit_code = 0u32;
        let result = unsafe {
            let _ = WaitForSingleObject(info.hProcess, INFINITE);
            GetExitCodeProcess(info.hProcess, &mut exit_code)
        };
        unsafe {
            let _ = CloseHandle(info.hProcess);
        }

        result
            .map(|()| exit_code)
            .map_err(|error| RunasError::Failed(error.message()))
    }

    /// Base64-encoded UTF-16LE for PowerShell `-EncodedCommand`.
    pub fn encode_powershell_command(command: &str) -> String {
        use base64::{Engine, engine::general_purpose::STANDARD};

        let data: Vec<u8> = command
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        STANDARD.encode(&data)
    }
}

pub fn is_running_as_admin() -> bool {
    use windows::Win32::UI::Shell::IsUserAnAdmin;
    unsafe { IsUserAnAdmin().as_bool() }
}

/// Copy stops on error; the flush steps that follow never change the exit code.
pub fn elevated_script(source: &Path, target: &Path, flusher: &CacheFlusher) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; \
         Copy-Item -LiteralPath {} -Destination {} -Force; \
         $ErrorActionPreference = 'Continue'; \
         {}; \
         exit 0",
        powershell_quote(&source.to_string_lossy()),
        powershell_quote(&target.to_string_lossy()),
        flusher.shell_chain(),
    )
}

pub struct ElevatedOs {
    flusher: CacheFlusher,
}

impl ElevatedOs {
    pub fn new(flusher: CacheFlusher) -> Self {
        Self { flusher }
    }

    fn run_as_admin(&self, script: &str) -> Result<Flushed, ApplyError> {
        let mut arguments = POWERSHELL_ARGS.to_vec();
        arguments.extend(["-Command", script]);
        let output = run_command("powershell", &arguments)?;
        if output.success() {
            Ok(Flushed::InElevatedStep)
        } else {
            Err(ApplyError::ProcessFailure(output.failure_detail()))
        }
    }

    fn run_with_uac(&self, script: &str) -> Result<Flushed, ApplyError> {
        let encoded = win32::encode_powershell_command(script);
        let arguments = format!("{} -EncodedCommand {encoded}", POWERSHELL_ARGS.join(" "));

        log::info!("[apply] requesting UAC elevation for hosts file copy");
        match win32::shell_execute_runas_and_wait("powershell.exe", &arguments) {
            Ok(0) => Ok(Flushed::InElevatedStep),
            Ok(code) => Err(ApplyError::ProcessFailure(format!(
                "elevated helper exited with code {code}"
            ))),
            Err(win32::RunasError::Cancelled) => Err(ApplyError::PermissionDenied(
                "UAC elevation was declined".into(),
            )),
            Err(win32::RunasError::Failed(message)) => Err(ApplyError::PermissionDenied(message)),
        }
    }
}

impl PrivilegeElevator for ElevatedOs {
    fn name(&self) -> &str {
        "UAC"
    }

    fn copy_into_protected_path(
        &self,
        source: &Path,
        target: &Path,
    ) -> Result<Flushed, ApplyError> {
        let script = elevated_script(source, target, &self.flusher);
        if is_running_as_admin() {
            log::info!("[apply] running as administrator, copying {}", target.display());
            self.run_as_admin(&script)
        } else {
            self.run_with_uac(&script)
        }
    }

    // Both copy paths run the flush chain inside the elevated script.
    fn flush_caches(&self) {
        log::debug!("[flush] caches already flushed by the elevated script");
    }
}
