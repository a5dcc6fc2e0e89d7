//! wsfs: a minimal dual-stack HTTP/1.x static file server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                        wsfs                          │
//!   IPv4 client ──┼─▶ net::listener (ipv4) ─┐                            │
//!                 │                         ├─▶ net::connection          │
//!   IPv6 client ──┼─▶ net::listener (ipv6) ─┘     │                      │
//!                 │                               ▼                      │
//!                 │   http::parser → cache ──miss──▶ content → response  │
//!                 │                    │hit                    │         │
//!                 │                    └──────────▶ write ◀────┘         │
//!                 │                                                      │
//!                 │   config · observability · lifecycle                 │
//!                 └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod cache;
pub mod content;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
