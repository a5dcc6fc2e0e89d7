//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (optionally with `severity` and `source` fields)
//!     → logging.rs (SyslogLayer: threshold filter, one line per event)
//!
//! Consumers:
//!     → stderr, or an append-only log file (--log-output)
//! ```
//!
//! # Design Decisions
//! - One global subscriber, installed once by the binary
//! - Library code never writes to stderr directly

pub mod logging;

pub use logging::{log, Severity};
