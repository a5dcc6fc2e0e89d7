//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (one listener per address family)
//!     → listener.rs (bind, accept loop, connection limits)
//!     → connection.rs (state machine: parse, cache, build, write)
//!     → close
//!
//! Connection States:
//!     AwaitingRequest → Parsing → CacheLookup → Building → Writing → Closed
//!                                   (any transport failure) → Failed
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - One request per connection; no keep-alive

pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionId, ConnectionState, ConnectionTracker, HandlerContext, Outcome};
pub use listener::{AddressFamily, Listener, ListenerError};
