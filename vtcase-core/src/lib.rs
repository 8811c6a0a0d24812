//! Shared plumbing for the VT record/replay toolkit: interned strings, the
//! recorded-host sentinel, and a common tracing setup used by all three
//! binaries.

pub mod prelude {
	pub use crate::Strng;
	pub use crate::RECORDED_HOST;
	pub use std::sync::Arc;
	pub use std::time::{Duration, Instant};
	pub use tracing::{debug, error, info, trace, warn};
}

/// Small interned string, used throughout for header/URI text that gets
/// cloned a lot but rarely mutated.
pub type Strng = arcstr::ArcStr;

/// `RecordedHost` from spec §3: an RFC 5737 TEST-NET-1 address used as a
/// host-independent sentinel in stored TestCase files.
pub const RECORDED_HOST: &str = "192.0.2.123";

/// The only service name the recorder/emulator currently implement. Stored
/// as the directory name under a TestCase (`<OID>/TestCaseN/HTTP/...`).
pub const HTTP_SERVICE_NAME: &str = "HTTP";

/// Installs the `tracing` subscriber shared by `recorder`, `emulator`, and
/// `vts-test-runner`. Writes to stderr always; if `log_dir` is given, also
/// writes a non-rolling file in that directory named `<component>.log`.
pub fn init_tracing(component: &str, log_dir: Option<&std::path::Path>) -> anyhow::Result<()> {
	use tracing_subscriber::prelude::*;
	use tracing_subscriber::{EnvFilter, fmt};

	let stderr_layer = fmt::layer()
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.with_target(false);

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

	if let Some(dir) = log_dir {
		std::fs::create_dir_all(dir)?;
		let file_appender = tracing_appender::rolling::never(dir, format!("{component}.log"));
		let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
		// Leak the guard: it must live for the process lifetime, and these
		// binaries never tear down logging before exit.
		std::mem::forget(guard);
		let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
		registry.with(file_layer).init();
	} else {
		registry.init();
	}

	Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recorded_host_is_test_net_1() {
		assert_eq!(RECORDED_HOST, "192.0.2.123");
	}
}
