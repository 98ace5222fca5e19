use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::channel::oneshot;
use serde::Serialize;

use crate::{
    applier::PrivilegedApplier, document::OverrideDocument, error::OperationError,
    fetcher::ContentFetcher,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Install,
    Update,
    Uninstall,
}

impl OperationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
        }
    }

    /// Whether a successful run leaves the redirection in place.
    pub fn connects(self) -> bool {
        matches!(self, Self::Install | Self::Update)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub kind: OperationKind,
    pub error: Option<String>,
}

impl OperationResult {
    fn from_outcome(kind: OperationKind, outcome: Result<(), OperationError>) -> Self {
        match outcome {
            Ok(()) => Self {
                success: true,
                kind,
                error: None,
            },
            Err(error) => Self {
                success: false,
                kind,
                error: Some(error.to_string()),
            },
        }
    }

    /// The job ended without reporting (panicked or never started).
    pub fn abandoned(kind: OperationKind) -> Self {
        Self {
            success: false,
            kind,
            error: Some("operation ended without a result".into()),
        }
    }
}

pub type Completion = oneshot::Receiver<OperationResult>;

/// Clears the busy flag when the job's thread exits, including by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs at most one hosts-file mutation at a time, each on its own thread.
pub struct OperationPipeline {
    fetcher: Arc<ContentFetcher>,
    applier: Arc<PrivilegedApplier>,
    busy: Arc<AtomicBool>,
}

impl OperationPipeline {
    pub fn new(fetcher: ContentFetcher, applier: PrivilegedApplier) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            applier: Arc::new(applier),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Starts `kind` unless a job is already in flight, in which case the
    /// request is dropped and `None` is returned.
    pub fn submit(&self, kind: OperationKind) -> Option<Completion> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("[pipeline] busy, dropping {} request", kind.label());
            return None;
        }

        let guard = BusyGuard(self.busy.clone());
        let (sender, receiver) = oneshot::channel();
        let fetcher = self.fetcher.clone();
        let applier = self.applier.clone();

        log::info!("[pipeline] starting {}", kind.label());
        let spawned = std::thread::Builder::new()
            .name(format!("hostsgate-{}", kind.label()))
            .spawn(move || {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    execute(kind, &fetcher, &applier)
                }));
                let result = match outcome {
                    Ok(outcome) => OperationResult::from_outcome(kind, outcome),
                    Err(_panic) => OperationResult::abandoned(kind),
                };
                match &result.error {
                    None => log::info!("[pipeline] {} succeeded", kind.label()),
                    Some(error) => log::warn!("[pipeline] {} failed: {error}", kind.label()),
                }
                drop(guard);
                let _ = sender.send(result);
            });

        if let Err(error) = spawned {
            log::error!("[pipeline] failed to spawn {} job: {error}", kind.label());
        }

        Some(receiver)
    }
}

fn execute(
    kind: OperationKind,
    fetcher: &ContentFetcher,
    applier: &PrivilegedApplier,
) -> Result<(), OperationError> {
    let document = match kind {
        OperationKind::Install | OperationKind::Update => fetcher.fetch()?,
        OperationKind::Uninstall => OverrideDocument::loopback_default(),
    };
    applier.apply(&document)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        path::{Path, PathBuf},
        sync::Mutex,
        time::Duration,
    };

    use super::*;
    use crate::{
        applier::tests::FakeElevator,
        error::{ApplyError, FetchError},
        fetcher::{
            DocumentClient,
            tests::{FakeClient, settings},
        },
        system::{Flushed, PrivilegeElevator},
    };

    /// Holds every GET until the test releases it.
    pub struct GatedClient {
        pub inner: FakeClient,
        pub gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl DocumentClient for GatedClient {
        fn get(&self, url: &str) -> Result<String, FetchError> {
            if let Some(gate) = self.gate.lock().unwrap().take() {
                let _ = gate.recv();
            }
            self.inner.get(url)
        }
    }

    /// Panics in the middle of the privileged copy.
    pub struct PanickingElevator;

    impl PrivilegeElevator for PanickingElevator {
        fn name(&self) -> &str {
            "panicking"
        }

        fn copy_into_protected_path(
            &self,
            _source: &Path,
            _target: &Path,
        ) -> Result<Flushed, ApplyError> {
            panic!("elevated helper crashed");
        }

        fn flush_caches(&self) {}
    }

    pub fn pipeline_with_elevator(
        client: Arc<dyn DocumentClient>,
        elevator: Arc<dyn PrivilegeElevator>,
        target: &Path,
    ) -> OperationPipeline {
        let settings = settings();
        OperationPipeline::new(
            ContentFetcher::new(client, &settings),
            PrivilegedApplier::new(elevator, PathBuf::from(target), Duration::ZERO),
        )
    }

    pub fn pipeline_with(client: Arc<dyn DocumentClient>, target: &Path) -> OperationPipeline {
        pipeline_with_elevator(client, Arc::new(FakeElevator::default()), target)
    }

    pub fn primary_only() -> FakeClient {
        FakeClient::with(&[("https://primary.test/hosts", Ok("1.2.3.4 dns.malw.link\n"))])
    }

    #[test]
    fn install_writes_fetched_document() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        let pipeline = pipeline_with(Arc::new(primary_only()), &target);

        let completion = pipeline.submit(OperationKind::Install).expect("accepted");
        let result = futures::executor::block_on(completion).expect("result");

        assert_eq!(
            result,
            OperationResult {
                success: true,
                kind: OperationKind::Install,
                error: None
            }
        );
        assert_eq!(
            std::fs::read_to_string(&target).expect("read"),
            "1.2.3.4 dns.malw.link\n"
        );
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn fetch_failure_never_touches_the_file() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, "original\n").expect("write");
        let pipeline = pipeline_with(Arc::new(FakeClient::default()), &target);

        let completion = pipeline.submit(OperationKind::Update).expect("accepted");
        let result = futures::executor::block_on(completion).expect("result");

        assert!(!result.success);
        assert_eq!(result.kind, OperationKind::Update);
        assert!(result.error.expect("detail").contains("fetch failed"));
        assert_eq!(std::fs::read_to_string(&target).expect("read"), "original\n");
    }

    #[test]
    fn install_over_active_file_stays_active() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, "1.2.3.4 dns.malw.link\n").expect("write");
        let pipeline = pipeline_with(Arc::new(primary_only()), &target);
        let oracle = crate::status::StatusOracle::new(target.clone(), "dns.malw.link");

        for _ in 0..2 {
            let completion = pipeline.submit(OperationKind::Install).expect("accepted");
            assert!(futures::executor::block_on(completion).expect("result").success);
            assert!(oracle.is_active());
        }
    }

    #[test]
    fn uninstall_skips_the_network() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        let client = Arc::new(FakeClient::default());
        let pipeline = pipeline_with(client.clone(), &target);

        let completion = pipeline.submit(OperationKind::Uninstall).expect("accepted");
        assert!(futures::executor::block_on(completion).expect("result").success);
        assert!(client.requested.lock().unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(&target).expect("read"),
            crate::document::LOOPBACK_DEFAULT
        );
    }

    #[test]
    fn second_submission_while_busy_is_dropped() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        let (release, gate) = std::sync::mpsc::channel();
        let client = Arc::new(GatedClient {
            inner: primary_only(),
            gate: Mutex::new(Some(gate)),
        });
        let pipeline = pipeline_with(client.clone(), &target);

        let first = pipeline.submit(OperationKind::Install).expect("accepted");
        assert!(pipeline.is_busy());
        assert!(pipeline.submit(OperationKind::Uninstall).is_none());
        assert!(pipeline.submit(OperationKind::Update).is_none());

        release.send(()).expect("release");
        let result = futures::executor::block_on(first).expect("result");
        assert!(result.success);
        assert_eq!(result.kind, OperationKind::Install);
        assert!(!pipeline.is_busy());
        assert_eq!(client.inner.requested.lock().unwrap().len(), 2);

        let next = pipeline.submit(OperationKind::Uninstall).expect("accepted again");
        assert!(futures::executor::block_on(next).expect("result").success);
    }

    #[test]
    fn panicking_job_reports_failure_and_frees_the_pipeline() {
        let directory = tempfile::tempdir().expect("tempdir");
        let target = directory.path().join("hosts");
        std::fs::write(&target, "original\n").expect("write");
        let pipeline = pipeline_with_elevator(
            Arc::new(FakeClient::default()),
            Arc::new(PanickingElevator),
            &target,
        );

        let completion = pipeline.submit(OperationKind::Uninstall).expect("accepted");
        let result = futures::executor::block_on(completion).expect("result");
        assert_eq!(result, OperationResult::abandoned(OperationKind::Uninstall));
        assert!(!pipeline.is_busy());
        assert_eq!(std::fs::read_to_string(&target).expect("read"), "original\n");
        assert!(pipeline.submit(OperationKind::Uninstall).is_some());
    }
}
