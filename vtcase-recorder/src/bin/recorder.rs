use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use vtcase_recorder::cli::Args;
use vtcase_recorder::RecordingSession;
use vtcase_runner::{GrepOidResolver, LocalProcessScanner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    vtcase_core::init_tracing("recorder", args.log_dir.as_deref())
        .context("failed to install tracing")?;

    let target_port = *args
        .target_ports
        .first()
        .context("at least one --port is required")?;
    let target: SocketAddr = format!("{}:{target_port}", args.target_host)
        .parse()
        .context("invalid --target-host/--port combination")?;

    let session = RecordingSession {
        listen: args.listen,
        target,
        vt_filenames: args.vt_filenames,
        target_ports: args.target_ports,
        store_root: args.store_root,
    };

    let scanner = LocalProcessScanner::new(&args.scanner_bin);
    let oid_resolver = GrepOidResolver;

    let written = session.run(&scanner, &oid_resolver).await?;
    for dir in written {
        tracing::info!(test_case = %dir.display(), "wrote TestCase");
    }
    Ok(())
}
