use std::sync::Arc;

use serde::Serialize;

use crate::{
    applier::PrivilegedApplier,
    configuration::Settings,
    fetcher::{ContentFetcher, DocumentClient},
    pipeline::{Completion, OperationKind, OperationPipeline, OperationResult},
    status::StatusOracle,
    system::PrivilegeElevator,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Updating,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Updating => "Updating",
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting | Self::Updating)
    }

    fn observed(active: bool) -> Self {
        if active {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Changed {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Shown to the user as a single generic failure message.
    OperationFailed {
        kind: OperationKind,
        detail: String,
    },
}

struct Pending {
    kind: OperationKind,
    completion: Completion,
}

/// Display state for the toggle. The hosts file stays the source of truth:
/// stable states are re-read from the oracle whenever no job is in flight.
pub struct ConnectionStateMachine {
    oracle: StatusOracle,
    pipeline: OperationPipeline,
    state: ConnectionState,
    pending: Option<Pending>,
}

impl ConnectionStateMachine {
    pub fn new(oracle: StatusOracle, pipeline: OperationPipeline) -> Self {
        let state = ConnectionState::observed(oracle.is_active());
        log::info!("[state] initial state: {}", state.label());
        Self {
            oracle,
            pipeline,
            state,
            pending: None,
        }
    }

    /// Wires the whole core together for `settings`.
    pub fn from_settings(
        settings: &Settings,
        client: Arc<dyn DocumentClient>,
        elevator: Arc<dyn PrivilegeElevator>,
    ) -> Self {
        let pipeline = OperationPipeline::new(
            ContentFetcher::new(client, settings),
            PrivilegedApplier::new(
                elevator,
                settings.hosts_path.clone(),
                settings.settle_delay(),
            ),
        );
        Self::new(
            StatusOracle::new(settings.hosts_path.clone(), settings.signature.clone()),
            pipeline,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn oracle(&self) -> &StatusOracle {
        &self.oracle
    }

    /// Connects when disconnected and vice versa. Returns the entry into the
    /// transitional state, or `None` when ignored while busy.
    pub fn toggle(&mut self) -> Option<Notice> {
        match self.state {
            ConnectionState::Disconnected => {
                self.start(OperationKind::Install, ConnectionState::Connecting)
            }
            ConnectionState::Connected => {
                self.start(OperationKind::Uninstall, ConnectionState::Disconnecting)
            }
            busy => {
                log::debug!("[state] toggle ignored while {}", busy.label());
                None
            }
        }
    }

    /// Re-fetches the override set. Only meaningful while connected.
    pub fn update(&mut self) -> Option<Notice> {
        if self.state != ConnectionState::Connected {
            log::debug!("[state] update ignored while {}", self.state.label());
            return None;
        }
        self.start(OperationKind::Update, ConnectionState::Updating)
    }

    fn start(&mut self, kind: OperationKind, transitional: ConnectionState) -> Option<Notice> {
        let completion = self.pipeline.submit(kind)?;
        self.pending = Some(Pending { kind, completion });
        let from = self.state;
        self.transition(transitional);
        Some(Notice::Changed {
            from,
            to: transitional,
        })
    }

    /// Collects a finished job, then reconciles with the hosts file.
    pub fn tick(&mut self) -> Vec<Notice> {
        let finished = self.poll_pending();
        self.settle(finished)
    }

    /// Blocks until the in-flight job (if any) reports, then reconciles.
    pub fn wait(&mut self) -> Vec<Notice> {
        let finished = self.pending.take().map(|pending| {
            futures::executor::block_on(pending.completion)
                .unwrap_or_else(|_canceled| OperationResult::abandoned(pending.kind))
        });
        self.settle(finished)
    }

    fn settle(&mut self, finished: Option<OperationResult>) -> Vec<Notice> {
        let mut notices = Vec::new();
        let before = self.state;

        if let Some(result) = finished {
            self.finish(&result);
            if !result.success {
                notices.push(Notice::OperationFailed {
                    kind: result.kind,
                    detail: result.error.unwrap_or_default(),
                });
            }
        }

        if self.pending.is_none() {
            let observed = ConnectionState::observed(self.oracle.is_active());
            if observed != self.state {
                log::info!(
                    "[state] hosts file changed externally, now {}",
                    observed.label()
                );
                self.transition(observed);
            }
        }

        if self.state != before {
            notices.insert(
                0,
                Notice::Changed {
                    from: before,
                    to: self.state,
                },
            );
        }

        notices
    }

    fn poll_pending(&mut self) -> Option<OperationResult> {
        let pending = self.pending.as_mut()?;
        let result = match pending.completion.try_recv() {
            Ok(None) => return None,
            Ok(Some(result)) => result,
            Err(_canceled) => OperationResult::abandoned(pending.kind),
        };
        self.pending = None;
        Some(result)
    }

    fn finish(&mut self, result: &OperationResult) {
        let observed = ConnectionState::observed(self.oracle.is_active());
        if result.success {
            let expected = ConnectionState::observed(result.kind.connects());
            if expected != observed {
                log::warn!(
                    "[state] {} succeeded but hosts file reads {}",
                    result.kind.label(),
                    observed.label()
                );
            }
        } else {
            log::warn!(
                "[state] {} failed, reverting to {}",
                result.kind.label(),
                observed.label()
            );
        }
        self.transition(observed);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            log::info!("[state] {} -> {}", self.state.label(), next.label());
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Mutex};

    use super::*;
    use crate::{
        document::LOOPBACK_DEFAULT,
        fetcher::{DocumentClient, tests::FakeClient},
        pipeline::tests::{
            GatedClient, PanickingElevator, pipeline_with, pipeline_with_elevator, primary_only,
        },
    };

    const SIGNATURE: &str = "dns.malw.link";

    fn machine(client: Arc<dyn DocumentClient>, target: &Path) -> ConnectionStateMachine {
        ConnectionStateMachine::new(
            StatusOracle::new(target.to_path_buf(), SIGNATURE),
            pipeline_with(client, target),
        )
    }

    #[test]
    fn initial_state_comes_from_the_hosts_file() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, "1.2.3.4 dns.malw.link\n").expect("write");
        assert_eq!(
            machine(Arc::new(FakeClient::default()), &target).state(),
            ConnectionState::Connected
        );

        std::fs::write(&target, LOOPBACK_DEFAULT).expect("write");
        assert_eq!(
            machine(Arc::new(FakeClient::default()), &target).state(),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn connect_then_disconnect_round_trip() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, LOOPBACK_DEFAULT).expect("write");
        let mut machine = machine(Arc::new(primary_only()), &target);

        assert_eq!(
            machine.toggle(),
            Some(Notice::Changed {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connecting
            })
        );
        assert_eq!(machine.state(), ConnectionState::Connecting);
        let notices = machine.wait();
        assert_eq!(
            notices,
            vec![Notice::Changed {
                from: ConnectionState::Connecting,
                to: ConnectionState::Connected
            }]
        );

        assert_eq!(
            machine.update(),
            Some(Notice::Changed {
                from: ConnectionState::Connected,
                to: ConnectionState::Updating
            })
        );
        assert_eq!(machine.state(), ConnectionState::Updating);
        machine.wait();
        assert_eq!(machine.state(), ConnectionState::Connected);

        assert!(machine.toggle().is_some());
        assert_eq!(machine.state(), ConnectionState::Disconnecting);
        machine.wait();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(std::fs::read_to_string(&target).expect("read"), LOOPBACK_DEFAULT);
        assert!(!machine.oracle().is_active());
    }

    #[test]
    fn failed_connect_reverts_and_reports() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, LOOPBACK_DEFAULT).expect("write");
        let mut machine = machine(Arc::new(FakeClient::default()), &target);

        assert!(machine.toggle().is_some());
        let notices = machine.wait();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(matches!(
            notices.as_slice(),
            [
                Notice::Changed {
                    from: ConnectionState::Connecting,
                    to: ConnectionState::Disconnected
                },
                Notice::OperationFailed {
                    kind: OperationKind::Install,
                    ..
                }
            ]
        ));
        assert_eq!(std::fs::read_to_string(&target).expect("read"), LOOPBACK_DEFAULT);
    }

    #[test]
    fn update_requires_connected() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        let mut machine = machine(Arc::new(primary_only()), &target);
        assert!(machine.update().is_none());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn toggle_is_ignored_while_a_job_runs() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        let (release, gate) = std::sync::mpsc::channel();
        let client = Arc::new(GatedClient {
            inner: primary_only(),
            gate: Mutex::new(Some(gate)),
        });
        let mut machine = machine(client, &target);

        assert!(machine.toggle().is_some());
        assert!(machine.toggle().is_none());
        assert!(machine.tick().is_empty());
        assert_eq!(machine.state(), ConnectionState::Connecting);

        release.send(()).expect("release");
        machine.wait();
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn external_edits_are_picked_up_by_tick() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, LOOPBACK_DEFAULT).expect("write");
        let mut machine = machine(Arc::new(FakeClient::default()), &target);
        assert!(machine.tick().is_empty());

        std::fs::write(&target, "9.9.9.9 dns.malw.link\n").expect("write");
        assert_eq!(
            machine.tick(),
            vec![Notice::Changed {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connected
            }]
        );

        std::fs::remove_file(&target).expect("remove");
        machine.tick();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn panicking_job_reverts_and_accepts_the_next_toggle() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, LOOPBACK_DEFAULT).expect("write");
        let mut machine = ConnectionStateMachine::new(
            StatusOracle::new(target.clone(), SIGNATURE),
            pipeline_with_elevator(Arc::new(primary_only()), Arc::new(PanickingElevator), &target),
        );

        assert!(machine.toggle().is_some());
        let notices = machine.wait();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(notices.iter().any(|notice| matches!(
            notice,
            Notice::OperationFailed {
                kind: OperationKind::Install,
                ..
            }
        )));
        assert_eq!(std::fs::read_to_string(&target).expect("read"), LOOPBACK_DEFAULT);

        assert!(machine.toggle().is_some());
        assert_eq!(machine.state(), ConnectionState::Connecting);
        machine.wait();
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }
}
