//! Recording proxy: a TPROXY listener, a per-connection capture worker that
//! frames traffic into HTTP messages while relaying it live, and the
//! session glue that canonicalizes a completed scan into a TestCase.

pub mod aggregator;
pub mod capture;
pub mod cli;
pub mod session;
pub mod tproxy;

pub use aggregator::{Aggregator, AggregatorError};
pub use capture::{CapturedExchange, CaptureError, handle_connection};
pub use session::{RecordingSession, SessionError};
