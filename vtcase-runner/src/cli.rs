//! `vts-test-runner` CLI surface.
//!
//! Grounded on `original_source/vts-testing/vts-testing/cli_parsing/cli_parsing.py`.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vts-test-runner", about = "Replays TestCases against an emulator/scanner pair")]
pub struct Args {
    /// Root directory holding `<OID>/TestCaseN/...` directories.
    #[arg(long)]
    pub store_root: PathBuf,

    /// OID(s) to run every recorded TestCase for. Repeatable.
    #[arg(long = "oid", required = true)]
    pub oids: Vec<String>,

    /// Path to the `emulator` binary.
    #[arg(long)]
    pub emulator_bin: PathBuf,

    /// Path to the scanner executable (e.g. `openvas`).
    #[arg(long)]
    pub scanner_bin: PathBuf,

    /// Maximum number of emulator/scanner pairs running concurrently.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Host the emulator and scanner run against; each TestCase's own
    /// `ScanInfo.RecordedPorts` decide which ports get bound.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Directory to additionally write a `vts-test-runner.log` file into.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
