//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! http::server   → trace span per request (request_id, method, uri)
//! routing::App   → "Dispatching layer" / "Request complete" events
//!                → metrics::record_request (count + latency by status)
//! session::store → metrics::record_sessions_active (gauge)
//!
//! logging.rs → fmt subscriber on stdout, filtered by RUST_LOG or config
//! metrics.rs → Prometheus scrape listener when enabled
//! ```
//!
//! # Design Decisions
//! - Without an installed recorder every metrics call is a no-op
//! - Dispatch chatter is at debug; unhandled 5xx errors log at error

pub mod logging;
pub mod metrics;
