//! Cookie and session subsystem.
//!
//! # Data Flow
//! ```text
//! Cookie header
//!     → cookie.rs (parse into req.cookies)
//!     → middleware.rs (look up id in the runtime's SessionStore)
//!         valid     → Session::resume (expiry renewed, cookie re-issued)
//!         expired   → evicted, anonymous Session
//!         absent    → anonymous Session
//!     → handlers mutate req.session (view.rs, write-through to store.rs)
//!     → commit hook before flush → at most one session Set-Cookie
//! ```
//!
//! # Design Decisions
//! - Explicit mutation API instead of intercepted field writes
//! - A single queued cookie action per request; the latest state wins
//! - Unknown ids are never adopted; a fresh id is issued on first write

pub mod cookie;
pub mod middleware;
pub mod store;
pub mod view;

pub use cookie::{cookie_parser, CookieOptions, CookieParser, Cookies, SameSite};
pub use middleware::{session, SessionMiddleware};
pub use store::{SessionRecord, SessionStore};
pub use view::Session;
