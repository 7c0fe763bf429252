//! Minimal HTTP application runtime library.
//!
//! Layered middleware and routing with error propagation, cookie-backed
//! in-memory sessions, response helpers and a small template engine.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod runtime;
pub mod session;
pub mod views;

pub use config::schema::AppConfig;
pub use http::{HttpError, HttpServer, Request, Response};
pub use lifecycle::Shutdown;
pub use routing::{App, Flow};
pub use runtime::Runtime;
