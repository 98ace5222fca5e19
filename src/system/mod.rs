use std::{
    io,
    path::Path,
    process::{Command, Stdio},
    sync::Arc,
};

use crate::{error::ApplyError, flusher::CacheFlusher};

#[cfg(not(target_os = "windows"))]
mod linux;
#[cfg(not(target_os = "windows"))]
pub use linux::PosixPolicyHelper;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use windows::ElevatedOs;

/// Whether the resolver caches were already flushed as part of the elevated copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flushed {
    InElevatedStep,
    Pending,
}

/// Platform capability for writing the protected file.
pub trait PrivilegeElevator: Send + Sync {
    fn name(&self) -> &str;

    /// Copies `source` over `target`. A failure leaves `target` untouched.
    fn copy_into_protected_path(&self, source: &Path, target: &Path)
    -> Result<Flushed, ApplyError>;

    fn flush_caches(&self);
}

#[cfg(not(target_os = "windows"))]
pub fn elevator() -> Arc<dyn PrivilegeElevator> {
    Arc::new(PosixPolicyHelper::new(CacheFlusher::for_platform()))
}

#[cfg(target_os = "windows")]
pub fn elevator() -> Arc<dyn PrivilegeElevator> {
    Arc::new(ElevatedOs::new(CacheFlusher::for_platform()))
}

#[cfg(target_os = "windows")]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x08000000;

pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Non-empty stderr lines joined, falling back to the exit code.
    pub fn failure_detail(&self) -> String {
        let stderr = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        match (stderr.is_empty(), self.code) {
            (false, _) => stderr,
            (true, Some(code)) => format!("exit code: {code}"),
            (true, None) => "terminated by signal".into(),
        }
    }
}

pub fn run_command(program: &str, arguments: &[&str]) -> io::Result<CommandOutput> {
    log::debug!("[cmd] {} {}", program, arguments.join(" "));
    let mut command = Command::new(program);
    command
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let output = command.output().inspect_err(|error| {
        log::debug!("[cmd] spawn error for {}: {}", program, error);
    })?;

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    if result.success() {
        log::trace!(
            "[cmd] OK: {} {} → stdout={}",
            program,
            arguments.join(" "),
            result.stdout.trim(),
        );
    } else {
        log::debug!(
            "[cmd] FAILED (exit {}): {} {}\n  stdout: {}\n  stderr: {}",
            result.code.unwrap_or(-1),
            program,
            arguments.join(" "),
            result.stdout.trim(),
            result.stderr.trim(),
        );
    }

    Ok(result)
}

pub fn run_silent_with_output(program: &str, arguments: &[&str]) -> (bool, String) {
    match run_command(program, arguments) {
        Ok(output) => (output.success(), output.stdout),
        Err(error) => (false, error.to_string()),
    }
}

pub fn run_silent(program: &str, arguments: &[&str]) -> bool {
    run_silent_with_output(program, arguments).0
}

/// Single-quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Single-quotes `value` for PowerShell.
pub fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_embedded_quotes() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn powershell_quote_doubles_quotes() {
        assert_eq!(powershell_quote(r"C:\Temp\x"), r"'C:\Temp\x'");
        assert_eq!(powershell_quote("it's"), "'it''s'");
    }

    #[test]
    fn failure_detail_prefers_stderr() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "cp: cannot create\n\n  regular file\n".into(),
        };
        assert_eq!(output.failure_detail(), "cp: cannot create regular file");

        let silent = CommandOutput {
            code: Some(126),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(silent.failure_detail(), "exit code: 126");
    }

    #[cfg(unix)]
    #[test]
    fn run_command_reports_exit_code() {
        let output = run_command("sh", &["-c", "echo out; echo err >&2; exit 3"]).expect("spawn");
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.failure_detail(), "err");
        assert!(!run_silent("sh", &["-c", "exit 1"]));
        assert!(run_silent("sh", &["-c", "true"]));
    }
}
