//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum connection loop, request ID, trace span)
//!     → request.rs (per-request context, incremental body reads)
//!     → [routing layer walks the application's layers]
//!     → body.rs / static_files.rs (built-in middleware)
//!     → response.rs (helpers, commit hooks, conversion)
//!     → Send to client
//! ```

pub mod body;
pub mod error;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

pub use error::HttpError;
pub use request::{MakeRequestUuidV4, Request, X_REQUEST_ID};
pub use response::{CommitHook, Payload, Response, POWERED_BY};
pub use server::{HttpServer, ServerError};
pub use static_files::{serve_static, ServeStatic};
