//! Error taxonomy for request handling.
//!
//! # Responsibilities
//! - Represent every failure a handler can hand to `next`
//! - Map each failure to the status code sent when nothing handles it
//!
//! # Design Decisions
//! - One enum for per-request errors; setup errors (`RouteError`) live with
//!   the router so they can never reach the dispatch loop

use axum::http::StatusCode;

use crate::views::TemplateError;

/// A per-request failure threaded through the layer stack as the pending error.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Request body exceeded the configured cap.
    #[error("request body too large")]
    PayloadTooLarge,

    /// The request could not be understood (malformed body, bad encoding).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Reading the request body from the connection failed.
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),

    /// Serializing a response value failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// `render` was called without `views` and `view engine` settings.
    #[error("view engine or views directory not configured")]
    ViewNotConfigured,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An application-level failure with an explicit status.
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    /// A handler panicked; the payload message is preserved when it is a string.
    #[error("handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HttpError {
    /// Build an error carrying an explicit status code.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        HttpError::Status {
            status,
            message: message.into(),
        }
    }

    /// Wrap any error type.
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        HttpError::Other(Box::new(err))
    }

    /// Status code used when this error reaches the top of the stack.
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::BadRequest(_) | HttpError::Body(_) => StatusCode::BAD_REQUEST,
            HttpError::Status { status, .. } => *status,
            HttpError::Json(_)
            | HttpError::ViewNotConfigured
            | HttpError::Template(_)
            | HttpError::Io(_)
            | HttpError::Panic(_)
            | HttpError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HttpError::Panic(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(HttpError::PayloadTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(HttpError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(HttpError::ViewNotConfigured.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            HttpError::with_status(StatusCode::FORBIDDEN, "nope").status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_panic_payload_message() {
        let err = HttpError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "handler panicked: boom");

        let err = HttpError::from_panic(Box::new(String::from("owned")));
        assert!(matches!(err, HttpError::Panic(ref m) if m == "owned"));

        let err = HttpError::from_panic(Box::new(42u8));
        assert!(matches!(err, HttpError::Panic(_)));
    }
}
