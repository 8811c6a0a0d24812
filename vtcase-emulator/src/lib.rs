//! Replay emulator: loads a recorded TestCase and serves its traffic back
//! to a scanner, service by service, each in its own worker process.

pub mod cli;
pub mod loader;
pub mod matcher;
pub mod service_manager;

pub use loader::{LoadedService, LoaderError, StaticFile};
pub use service_manager::SERVE_INTERNAL_FLAG;
