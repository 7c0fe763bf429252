//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runtime.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::body::DEFAULT_BODY_LIMIT;
use crate::session::CookieOptions;

/// Session ttl when the cookie carries no `Max-Age`.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Root configuration for the application.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (host, port).
    pub listener: ListenerConfig,

    /// Template directory and engine extension.
    pub views: ViewsConfig,

    /// Static file serving.
    pub static_files: StaticFilesConfig,

    /// Session cookie and store policy.
    pub session: SessionConfig,

    /// Request limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3004,
        }
    }
}

/// View rendering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewsConfig {
    /// Directory holding templates; rendering is disabled when unset.
    pub dir: Option<PathBuf>,

    /// Template file extension.
    pub engine: String,
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            engine: "ejs".to_string(),
        }
    }
}

/// Static file configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Root directory; static serving is disabled when unset.
    pub root: Option<PathBuf>,

    /// File served for directory requests. Empty disables index lookup.
    pub index: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: None,
            index: "index.html".to_string(),
        }
    }
}

/// Session middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name carrying the session id.
    pub name: String,

    /// Attributes of the session cookie. `max_age_ms` is also the ttl.
    pub cookie: CookieOptions,

    /// Re-issue the cookie on every mutation.
    pub rolling: bool,

    /// Re-issue the cookie on `save` even when nothing changed.
    pub resave: bool,

    /// Create and store a session for requests that never touched it.
    pub save_uninitialized: bool,

    /// Seconds between sweeps of expired records.
    pub purge_interval_secs: u64,
}

impl SessionConfig {
    /// How long a record lives after its last renewal.
    pub fn ttl(&self) -> Duration {
        self.cookie.max_age.unwrap_or(DEFAULT_SESSION_TTL)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "sid".to_string(),
            cookie: CookieOptions {
                max_age: Some(DEFAULT_SESSION_TTL),
                ..CookieOptions::default()
            },
            rolling: false,
            resave: false,
            save_uninitialized: false,
            purge_interval_secs: 60,
        }
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size accepted by the body parsers.
    pub body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            body_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
