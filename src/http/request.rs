//! Per-request context.
//!
//! # Responsibilities
//! - Hold method, URL, path, query, params, headers and parsed body
//! - Track mount prefixes (`base_url`) with save/restore discipline
//! - Collect the request body once, incrementally, under a size cap
//! - Generate request IDs for tracing
//!
//! # Design Decisions
//! - `url` and `path` are relative to the current mount point; the
//!   original URL is preserved for logging
//! - Body bytes are memoised so several parsers can inspect them

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method};
use futures_util::StreamExt;
use serde_json::Value;
use tower_http::request_id::{MakeRequestId, RequestId};

use crate::http::HttpError;
use crate::routing::matcher::{Params, PrefixMatcher};
use crate::session::{Cookies, Session};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a UUID v4 request ID when the client did not send one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Location state restored after a mounted layer returns.
#[derive(Debug)]
pub(crate) struct SavedLocation {
    url: String,
    path: String,
    base_url: String,
}

/// An incoming request as seen by handlers.
pub struct Request {
    pub method: Method,
    url: String,
    original_url: String,
    path: String,
    base_url: String,
    headers: HeaderMap,
    extensions: Extensions,

    /// Query string pairs; the last value wins for repeated keys.
    pub query: HashMap<String, String>,

    /// Parameters captured by the matched route.
    pub params: Params,

    /// Parsed body; `Null` until a body parser runs.
    pub body: Value,

    /// Cookies parsed by the cookie middleware.
    pub cookies: Cookies,

    /// Session view installed by the session middleware.
    pub session: Option<Session>,

    raw_body: Option<Body>,
    body_bytes: Option<Bytes>,
    body_too_large: bool,
    body_parsed: bool,
    handled: bool,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("base_url", &self.base_url)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Build the context from a transport request.
    pub fn from_http(request: axum::http::Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let path = path_of(&url);
        let query = parts.uri.query().map(parse_query).unwrap_or_default();

        Self {
            method: parts.method,
            original_url: url.clone(),
            url,
            path,
            base_url: String::new(),
            headers: parts.headers,
            extensions: parts.extensions,
            query,
            params: Params::new(),
            body: Value::Null,
            cookies: Cookies::new(),
            session: None,
            raw_body: Some(body),
            body_bytes: None,
            body_too_large: false,
            body_parsed: false,
            handled: false,
        }
    }

    /// URL relative to the current mount point, including the query.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL as received, before any prefix stripping.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    /// Path relative to the current mount point.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Accumulated mount prefixes.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value, if present and valid UTF-8.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes()).ok()?;
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type of the body with parameters stripped, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header(header::CONTENT_TYPE)
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
    }

    /// The request ID assigned at the edge, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.header(X_REQUEST_ID)
    }

    /// Peer address, when served over a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Whether a route layer matched this request.
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Whether a body parser already populated `body`.
    pub fn is_body_parsed(&self) -> bool {
        self.body_parsed
    }

    /// Store a parsed body and mark it as such.
    pub fn set_parsed_body(&mut self, body: Value) {
        self.body = body;
        self.body_parsed = true;
    }

    /// Collect the raw body, failing once more than `limit` bytes arrive.
    ///
    /// The first call drains the connection; later calls return the same bytes,
    /// or the same `PayloadTooLarge` once the limit was exceeded.
    pub async fn read_body(&mut self, limit: usize) -> Result<Bytes, HttpError> {
        if let Some(bytes) = &self.body_bytes {
            return Ok(bytes.clone());
        }
        if self.body_too_large {
            return Err(HttpError::PayloadTooLarge);
        }

        let declared = self
            .header(header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            self.raw_body = None;
            self.body_too_large = true;
            return Err(HttpError::PayloadTooLarge);
        }

        let Some(body) = self.raw_body.take() else {
            return Ok(Bytes::new());
        };

        let mut stream = body.into_data_stream();
        let mut collected: Vec<u8> = Vec::with_capacity(declared.unwrap_or(0));
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if collected.len() + chunk.len() > limit {
                self.body_too_large = true;
                return Err(HttpError::PayloadTooLarge);
            }
            collected.extend_from_slice(&chunk);
        }

        let bytes = Bytes::from(collected);
        self.body_bytes = Some(bytes.clone());
        Ok(bytes)
    }

    pub(crate) fn mark_handled(&mut self, params: Params) {
        self.params = params;
        self.handled = true;
    }

    /// Strip `prefix` from the URL and record it in `base_url`.
    pub(crate) fn enter(&mut self, prefix: &PrefixMatcher) -> SavedLocation {
        let saved = SavedLocation {
            url: self.url.clone(),
            path: self.path.clone(),
            base_url: self.base_url.clone(),
        };
        if !prefix.is_root() {
            self.url = prefix.strip(&self.url);
            self.path = path_of(&self.url);
            self.base_url.push_str(prefix.as_str());
        }
        saved
    }

    pub(crate) fn restore(&mut self, saved: SavedLocation) {
        self.url = saved.url;
        self.path = saved.path;
        self.base_url = saved.base_url;
    }
}

fn path_of(url: &str) -> String {
    let path = url.split('?').next().unwrap_or_default();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}
