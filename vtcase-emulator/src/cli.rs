//! `emulator` CLI surface.
//!
//! Grounded on `original_source/scan-target-emulator/target_emulator/cli_parsing/cli_parsing.py`
//! and `vtcase-recorder`'s `cli.rs` for the `clap::Parser` idiom.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "emulator", about = "Replays a recorded TestCase's network traffic")]
pub struct Args {
    /// TestCase directory to replay, e.g. `.../1.3.6.1.../TestCase3`.
    pub test_case_dir: PathBuf,

    /// Host services bind to once loaded; substituted for the recorded
    /// host sentinel in every stored string.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Directory to additionally write an `emulator.log` file into.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Internal: re-exec target for a single service's worker process.
    /// Not part of the documented CLI surface.
    #[arg(long = "serve-internal", hide = true)]
    pub serve_internal: Option<String>,
}

impl Args {
    /// The TestCase directory name must be `TestCase<N>` (ground: emulator
    /// CLI validation in the original, which refuses arbitrary directories).
    pub fn validate(&self) -> Result<(), String> {
        let name = self
            .test_case_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let ok = name
            .strip_prefix("TestCase")
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
        if ok {
            Ok(())
        } else {
            Err(format!("{} does not end in TestCase<N>", self.test_case_dir.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &str) -> Args {
        Args {
            test_case_dir: PathBuf::from(dir),
            host: "localhost".into(),
            log_dir: None,
            serve_internal: None,
        }
    }

    #[test]
    fn accepts_a_well_formed_test_case_directory() {
        assert!(args("/data/1.3.6.1.4.1.25623.1.0.1/TestCase3").validate().is_ok());
    }

    #[test]
    fn rejects_a_directory_without_the_testcase_suffix() {
        assert!(args("/data/1.3.6.1.4.1.25623.1.0.1").validate().is_err());
        assert!(args("/data/TestCase").validate().is_err());
        assert!(args("/data/TestCaseX").validate().is_err());
    }
}
