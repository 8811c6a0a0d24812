//! Drives one isolated worker process per recorded service, so a crash in
//! one service's handler can't take the others down with it.
//!
//! Grounded on `ServiceManager`/`Service` in
//! `original_source/scan-target-emulator/target_emulator/services/manager.py`:
//! services are discovered by subdirectory name, each becomes its own
//! daemon-like child process, and shutdown is graceful-only — SIGINT/SIGTERM
//! ask every worker to terminate and the manager waits, rather than
//! `vtcase_runner::executor`'s bounded-wait-then-force-kill policy, since a
//! replay target that's still draining a response shouldn't be cut off.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

const ENDPOINT_MAPPING_FILE: &str = "endpoint_mapping.json";
const SCAN_INFO_FILE: &str = "scan_info.json";

/// Hidden flag used to re-exec this same binary as a single service's
/// worker process (ground: the original's per-service subprocess, here
/// done by self-reexec rather than `fork`, since Rust has no direct
/// equivalent).
pub const SERVE_INTERNAL_FLAG: &str = "--serve-internal";

/// Subdirectory names under `test_case_dir` that look like a recorded
/// service (they carry an `endpoint_mapping.json`), in directory-listing
/// order.
fn discover_services(test_case_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut services = Vec::new();
    for entry in std::fs::read_dir(test_case_dir)
        .with_context(|| format!("reading {}", test_case_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !path.join(ENDPOINT_MAPPING_FILE).exists() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            services.push(name.to_string());
        }
    }
    if !test_case_dir.join(SCAN_INFO_FILE).exists() {
        anyhow::bail!("{} has no scan_info.json", test_case_dir.display());
    }
    Ok(services)
}

/// Spawns one isolated worker per recorded service and supervises them
/// until a shutdown signal arrives or a worker exits on its own.
pub async fn run(test_case_dir: PathBuf, host: String) -> anyhow::Result<()> {
    let services = discover_services(&test_case_dir)?;
    if services.is_empty() {
        anyhow::bail!("{} has no recorded services", test_case_dir.display());
    }
    for name in &services {
        if name != vtcase_core::HTTP_SERVICE_NAME {
            anyhow::bail!("unknown service {name:?}: no replay handler registered for it");
        }
    }

    let exe = std::env::current_exe().context("resolving own executable path")?;
    let mut pids = Vec::new();
    let (exited_tx, mut exited_rx) = mpsc::channel(services.len().max(1));
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    for name in &services {
        let mut cmd = tokio::process::Command::new(&exe);
        cmd.arg(&test_case_dir)
            .arg("--host")
            .arg(&host)
            .arg(SERVE_INTERNAL_FLAG)
            .arg(name)
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning {name} service worker"))?;
        pids.push(child.id());

        let name = name.clone();
        let tx = exited_tx.clone();
        handles.push(tokio::spawn(async move {
            let status = child.wait().await;
            let _ = tx.send((name, status)).await;
        }));
    }
    drop(exited_tx);

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let outcome = tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, asking service workers to stop");
            Ok(())
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, asking service workers to stop");
            Ok(())
        }
        Some((name, status)) = exited_rx.recv() => {
            tracing::error!(service = %name, ?status, "service worker exited spontaneously");
            Err(anyhow::anyhow!("service {name} exited spontaneously"))
        }
    };

    terminate(&pids);
    for handle in handles {
        let _ = handle.await;
    }

    outcome
}

fn terminate(pids: &[Option<u32>]) {
    for pid in pids.iter().flatten() {
        unsafe {
            libc::kill(*pid as i32, libc::SIGTERM);
        }
    }
}

/// Runs a single named service's worker: loads its TestCase data,
/// builds its router, and binds every recorded port. This is what
/// `--serve-internal <service>` re-execs into.
pub async fn serve_internal(service: &str, test_case_dir: &Path, host: &str) -> anyhow::Result<()> {
    match service {
        name if name == vtcase_core::HTTP_SERVICE_NAME => serve_http(test_case_dir, host).await,
        other => anyhow::bail!("unknown service {other:?}: no replay handler registered for it"),
    }
}

async fn serve_http(test_case_dir: &Path, host: &str) -> anyhow::Result<()> {
    let store = vtcase_model::TestCaseStore::existing(test_case_dir.to_path_buf());
    let (scan_info, _) = store
        .read()
        .context("reading scan_info.json for recorded ports")?;

    let loaded = crate::loader::load(test_case_dir, host)
        .await
        .context("loading HTTP service")?;
    let router = crate::matcher::build(loaded);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
            tokio::select! {
                _ = sigint.recv() => {},
                _ = sigterm.recv() => {},
            }
            shutdown.cancel();
        });
    }

    let mut set = JoinSet::new();
    for port in &scan_info.recorded_ports {
        let addr = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        let router = router.clone();
        let child_token = shutdown.child_token();
        set.spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    child_token.cancelled().await;
                })
                .await
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP listener exited with an error"),
            Err(e) => tracing::error!(error = %e, "HTTP listener task panicked"),
        }
    }
    Ok(())
}
