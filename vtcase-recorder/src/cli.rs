//! `recorder` CLI surface.
//!
//! Grounded on `original_source/vts-qa-recorder/vts-recording/cli_parsing/cli_parsing.py`.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "recorder", about = "Transparently proxies a scan and records a TestCase")]
pub struct Args {
    /// Address the TPROXY listener binds to, e.g. `0.0.0.0:10443`.
    #[arg(long)]
    pub listen: SocketAddr,

    /// VT source files to resolve OIDs for and to tag the recorded
    /// TestCase's `RecordedPlugins` with.
    #[arg(long = "vt", required = true)]
    pub vt_filenames: Vec<PathBuf>,

    /// Real target host the scanner should believe it's hitting.
    #[arg(long)]
    pub target_host: String,

    /// Ports on the target being scanned; also recorded in `scan_info.json`.
    #[arg(long = "port", required = true)]
    pub target_ports: Vec<u16>,

    /// Scanner executable to launch once the proxy is listening.
    #[arg(long)]
    pub scanner_bin: PathBuf,

    /// Root directory TestCases are written under (`<root>/<OID>/TestCaseN`).
    #[arg(long)]
    pub store_root: PathBuf,

    /// Directory to additionally write a `recorder.log` file into.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
