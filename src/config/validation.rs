//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, limits, ttl)
//! - Check cookie attributes are coherent
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::AppConfig;
use crate::session::SameSite;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    ZeroPort,
    ZeroBodyLimit,
    InvalidSessionName(String),
    ZeroSessionTtl,
    ZeroPurgeInterval,
    InsecureSameSiteNone,
    InvalidMetricsAddress(String),
    EmptyViewEngine,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::ZeroPort => write!(f, "listener.port must be non-zero"),
            ValidationError::ZeroBodyLimit => write!(f, "limits.body_bytes must be non-zero"),
            ValidationError::InvalidSessionName(name) => {
                write!(f, "session.name '{}' is not a valid cookie name", name)
            }
            ValidationError::ZeroSessionTtl => {
                write!(f, "session.cookie.max_age_ms must be non-zero")
            }
            ValidationError::ZeroPurgeInterval => {
                write!(f, "session.purge_interval_secs must be non-zero")
            }
            ValidationError::InsecureSameSiteNone => {
                write!(f, "session.cookie.same_site = \"none\" requires secure = true")
            }
            ValidationError::InvalidMetricsAddress(addr) => {
                write!(f, "observability.metrics_address '{}' is not a socket address", addr)
            }
            ValidationError::EmptyViewEngine => {
                write!(f, "views.engine must be set when views.dir is set")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }

    if config.limits.body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    if !is_cookie_token(&config.session.name) {
        errors.push(ValidationError::InvalidSessionName(config.session.name.clone()));
    }

    if config.session.ttl().is_zero() {
        errors.push(ValidationError::ZeroSessionTtl);
    }

    if config.session.purge_interval_secs == 0 {
        errors.push(ValidationError::ZeroPurgeInterval);
    }

    let cookie = &config.session.cookie;
    if cookie.same_site == Some(SameSite::None) && !cookie.secure {
        errors.push(ValidationError::InsecureSameSiteNone);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.views.dir.is_some() && config.views.engine.trim().is_empty() {
        errors.push(ValidationError::EmptyViewEngine);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// RFC 6265 token: visible ASCII without separators.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b)
        })
}
