use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use vtcase_runner::cli::Args;
use vtcase_runner::{LocalProcessScanner, LocalSandbox, TestExecutor, run_all};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    vtcase_core::init_tracing("vts-test-runner", args.log_dir.as_deref())
        .context("failed to install tracing")?;

    let scanner = Arc::new(LocalProcessScanner::new(&args.scanner_bin));
    let sandbox = Arc::new(LocalSandbox);
    let executor = Arc::new(TestExecutor::new(scanner, sandbox, args.emulator_bin.clone()));

    let mut test_cases = Vec::new();
    for oid in &args.oids {
        let oid_root = args.store_root.join(oid);
        let dirs = vtcase_model::TestCaseStore::list(&oid_root)
            .with_context(|| format!("listing TestCases under {}", oid_root.display()))?;
        for dir in dirs {
            test_cases.push((dir, vec![oid.clone()]));
        }
    }

    tracing::info!(count = test_cases.len(), "running TestCases");
    let results = run_all(executor, test_cases, args.concurrency, args.host.clone()).await;

    let mut failed = 0usize;
    for result in &results {
        match result {
            Ok(report) if report.passed => {
                tracing::info!(test_case = %report.test_case_dir.display(), "PASS");
            }
            Ok(report) => {
                failed += 1;
                tracing::error!(
                    test_case = %report.test_case_dir.display(),
                    expected = %report.expected_output,
                    actual = %report.actual_output,
                    "FAIL"
                );
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, "test case errored before completion");
            }
        }
    }

    tracing::info!(total = results.len(), failed, "run complete");
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
