use anyhow::Context;
use clap::Parser;
use vtcase_emulator::cli::Args;
use vtcase_emulator::service_manager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    vtcase_core::init_tracing("emulator", args.log_dir.as_deref())
        .context("failed to install tracing")?;
    args.validate().map_err(|e| anyhow::anyhow!(e))?;

    let result = match &args.serve_internal {
        Some(service) => service_manager::serve_internal(service, &args.test_case_dir, &args.host).await,
        None => service_manager::run(args.test_case_dir.clone(), args.host.clone()).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "emulator exiting on error");
        std::process::exit(1);
    }
    Ok(())
}
