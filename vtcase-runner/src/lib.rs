//! Test runner: drives an emulator + scanner pair per TestCase, with the
//! scanner process, sandbox, and OID lookup modeled as traits so the rest of
//! the crate is testable without any of them.

pub mod cli;
pub mod executor;
pub mod readiness;
pub mod sanitize;
pub mod traits;

pub use executor::{RunnerError, TestExecutor, TestReport, run_all};
pub use traits::{DriverError, GrepOidResolver, LocalProcessScanner, LocalSandbox, OidResolver, SandboxRuntime, ScannerDriver};
