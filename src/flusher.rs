use crate::system::run_silent;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlushStep {
    pub program: String,
    pub arguments: Vec<String>,
}

impl FlushStep {
    fn new(program: &str, arguments: &[&str]) -> Self {
        Self {
            program: program.into(),
            arguments: arguments.iter().map(|argument| argument.to_string()).collect(),
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// `a || b || c || true`
    FirstSuccess,
    /// `a; b; c`
    All,
}

/// Best-effort resolver cache invalidation. Never fails.
#[derive(Clone, Debug)]
pub struct CacheFlusher {
    steps: Vec<FlushStep>,
    mode: FlushMode,
}

impl CacheFlusher {
    pub fn new(steps: Vec<FlushStep>, mode: FlushMode) -> Self {
        Self { steps, mode }
    }

    pub fn posix() -> Self {
        Self::new(
            vec![
                FlushStep::new("resolvectl", &["flush-caches"]),
                FlushStep::new("systemd-resolve", &["--flush-caches"]),
                FlushStep::new("/etc/init.d/nscd", &["restart"]),
                FlushStep::new("killall", &["-HUP", "dnsmasq"]),
            ],
            FlushMode::FirstSuccess,
        )
    }

    pub fn windows() -> Self {
        Self::new(
            vec![
                FlushStep::new("Clear-DnsClientCache", &[]),
                FlushStep::new("ipconfig", &["/flushdns"]),
                FlushStep::new("ipconfig", &["/release"]),
                FlushStep::new("ipconfig", &["/renew"]),
                FlushStep::new("netsh", &["winsock", "reset"]),
            ],
            FlushMode::All,
        )
    }

    #[cfg(target_os = "windows")]
    pub fn for_platform() -> Self {
        Self::windows()
    }

    #[cfg(not(target_os = "windows"))]
    pub fn for_platform() -> Self {
        Self::posix()
    }

    pub fn steps(&self) -> &[FlushStep] {
        &self.steps
    }

    /// The chain as one shell fragment that always exits 0.
    pub fn shell_chain(&self) -> String {
        let mut parts: Vec<String> = self.steps.iter().map(FlushStep::command_line).collect();
        match self.mode {
            FlushMode::FirstSuccess => {
                parts.push("true".into());
                parts.join(" || ")
            }
            FlushMode::All => parts.join("; "),
        }
    }

    /// Returns how many steps succeeded.
    pub fn flush(&self) -> usize {
        let mut succeeded = 0;
        for step in &self.steps {
            let arguments: Vec<&str> = step.arguments.iter().map(String::as_str).collect();
            if run_silent(&step.program, &arguments) {
                log::info!("[flush] {}", step.command_line());
                succeeded += 1;
                if self.mode == FlushMode::FirstSuccess {
                    break;
                }
            } else {
                log::debug!("[flush] {} failed, continuing", step.command_line());
            }
        }
        if succeeded == 0 && !self.steps.is_empty() {
            log::warn!("[flush] no cache flush step succeeded");
        }
        succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_chain_always_succeeds() {
        assert_eq!(
            CacheFlusher::posix().shell_chain(),
            "resolvectl flush-caches || systemd-resolve --flush-caches || \
             /etc/init.d/nscd restart || killall -HUP dnsmasq || true"
        );
    }

    #[test]
    fn windows_chain_runs_every_step() {
        assert_eq!(
            CacheFlusher::windows().shell_chain(),
            "Clear-DnsClientCache; ipconfig /flushdns; ipconfig /release; \
             ipconfig /renew; netsh winsock reset"
        );
    }

    #[cfg(unix)]
    #[test]
    fn first_success_stops_the_chain() {
        let flusher = CacheFlusher::new(
            vec![
                FlushStep::new("false", &[]),
                FlushStep::new("true", &[]),
                FlushStep::new("true", &[]),
            ],
            FlushMode::FirstSuccess,
        );
        assert_eq!(flusher.flush(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn missing_programs_are_swallowed() {
        let flusher = CacheFlusher::new(
            vec![
                FlushStep::new("hostsgate-definitely-missing", &[]),
                FlushStep::new("true", &[]),
            ],
            FlushMode::All,
        );
        assert_eq!(flusher.flush(), 1);
    }
}
