//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → parser.rs (bounded read, request line, headers, body)
//!     → request.rs (method, target, version, ordered headers)
//!     → [cache lookup / content resolution]
//!     → response.rs (status line via status.rs, Date via date.rs)
//!     → Send to client, close
//!
//! server.rs owns the listeners and spawns a connection task per accept.
//! ```

pub mod date;
pub mod parser;
pub mod request;
pub mod response;
pub mod server;
pub mod status;

pub use parser::{MalformedRequest, ParseError, RequestParser};
pub use request::{Headers, Method, Request, Version};
pub use response::{Payload, Response};
pub use server::{HttpServer, ListenerFailure, ServerError};
pub use status::StatusCode;
