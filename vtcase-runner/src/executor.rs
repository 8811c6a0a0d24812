//! Drives one emulator + scanner pair per TestCase and reports pass/fail.
//!
//! Grounded on `TestExecutor` in
//! `original_source/vts-testing/vts-testing/models/test_executor.py`:
//! `test_and_report` spawns the emulator, waits for readiness, runs the
//! scanner against it, and compares sanitized output to the TestCase's
//! recorded `ScanInfo.Result`. `_terminate_target_emulator`'s graceful
//! SIGTERM-then-wait shutdown is kept as-is.

use crate::readiness::wait_until_ready;
use crate::sanitize;
use crate::traits::{DriverError, SandboxRuntime, ScannerDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use vtcase_model::{StoreError, TestCaseStore};

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("emulator at {0} did not become ready within {1:?}")]
    EmulatorNotReady(String, Duration),
    #[error("test case store error: {0}")]
    Store(#[from] StoreError),
    #[error("scanner/sandbox driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TestReport {
    pub test_case_dir: PathBuf,
    pub passed: bool,
    pub actual_output: String,
    pub expected_output: String,
}

pub struct TestExecutor {
    scanner: Arc<dyn ScannerDriver>,
    sandbox: Arc<dyn SandboxRuntime>,
    emulator_binary: PathBuf,
    ready_timeout: Duration,
}

impl TestExecutor {
    pub fn new(
        scanner: Arc<dyn ScannerDriver>,
        sandbox: Arc<dyn SandboxRuntime>,
        emulator_binary: PathBuf,
    ) -> Self {
        Self {
            scanner,
            sandbox,
            emulator_binary,
            ready_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Runs one TestCase: the recorded `ScanInfo.RecordedPorts` dictate
    /// which ports the emulator binds, not the caller, so concurrent runs
    /// against identically-ported recordings rely on `self.sandbox`
    /// isolating each run's network namespace.
    pub async fn test_and_report(
        &self,
        test_case_dir: &Path,
        host: &str,
        oids: &[String],
    ) -> Result<TestReport, RunnerError> {
        let store = TestCaseStore::existing(test_case_dir.to_path_buf());
        let (scan_info, _) = store.read()?;
        let ports = scan_info.recorded_ports.clone();
        let probe_port = *ports.first().unwrap_or(&0);

        self.sandbox.start().await?;

        let mut child = tokio::process::Command::new(&self.emulator_binary)
            .arg(test_case_dir)
            .arg("--host")
            .arg(host)
            .kill_on_drop(true)
            .spawn()?;

        let base_url = format!("http://{host}:{probe_port}/");
        let ready = wait_until_ready(&base_url, self.ready_timeout).await;

        let result = if ready {
            let outcome = self.scanner.scan(host, &ports, oids).await;
            outcome.and_then(|outcome| {
                store.read().map(|(scan_info, _)| (outcome, scan_info)).map_err(|_| {
                    DriverError::Sandbox("failed to reread test case scan_info".to_string())
                })
            })
        } else {
            Err(DriverError::Sandbox(format!(
                "emulator on port {probe_port} never became ready"
            )))
        };

        self.terminate_emulator(&mut child).await;
        self.sandbox.stop().await?;

        if !ready {
            return Err(RunnerError::EmulatorNotReady(base_url, self.ready_timeout));
        }
        let (outcome, scan_info) = result?;

        let mut hosts = vec![scan_info.recorded_host.clone(), host.to_string()];
        hosts.extend(self.sandbox.network_aliases());

        Ok(TestReport {
            test_case_dir: test_case_dir.to_path_buf(),
            passed: sanitize::compare(&outcome.stdout, &scan_info.result, &hosts),
            actual_output: outcome.stdout,
            expected_output: scan_info.result,
        })
    }

    /// SIGTERM, wait up to 5s, then force-kill only if it's still alive —
    /// graceful-only shutdown the way `_terminate_target_emulator` does.
    async fn terminate_emulator(&self, child: &mut tokio::process::Child) {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        if tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .is_err()
        {
            let _ = child.start_kill();
        }
    }
}

/// Runs every `(test_case_dir, oids)` pair with at most `concurrency`
/// emulator/scanner pairs alive at once. Each pair binds the ports its own
/// recording carries; isolation between concurrently running pairs with
/// colliding ports is `TestExecutor::sandbox`'s responsibility.
pub async fn run_all(
    executor: Arc<TestExecutor>,
    test_cases: Vec<(PathBuf, Vec<String>)>,
    concurrency: usize,
    host: String,
) -> Vec<Result<TestReport, RunnerError>> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let mut set = tokio::task::JoinSet::new();

    for (dir, oids) in test_cases.into_iter() {
        let semaphore = semaphore.clone();
        let executor = executor.clone();
        let host = host.clone();
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            executor.test_and_report(&dir, &host, &oids).await
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(report) => results.push(report),
            Err(join_err) => results.push(Err(RunnerError::Io(std::io::Error::other(join_err)))),
        }
    }
    results
}
