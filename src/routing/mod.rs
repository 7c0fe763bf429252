//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (walk layers in registration order)
//!     → layer.rs (does this layer apply? middleware prefix or route pattern)
//!     → matcher.rs (boundary-aligned prefix, `:param` / `*` captures)
//!     → handler.rs (Flow::Next continues, Flow::Done stops, Err becomes pending)
//!
//! Mounted routers:
//!     prefix stripped from url/path, appended to base_url
//!     → nested walk with its settings pushed onto the chain (settings.rs)
//!     → location and settings restored on return
//! ```
//!
//! # Design Decisions
//! - Layers compiled at registration, immutable at runtime
//! - No regex in hot path (segment walk only)
//! - Deterministic: same input always walks the same layers
//! - Panics inside handlers become the pending error

pub mod handler;
pub(crate) mod layer;
pub mod matcher;
pub mod router;
pub mod settings;

pub use handler::{ErrorHandler, FnErrorHandler, FnHandler, Flow, Handler, HandlerFuture};
pub use matcher::{Params, PathPattern, PrefixMatcher, RouteError, WILDCARD_PARAM};
pub use router::App;
pub use settings::{Settings, SettingsChain};
