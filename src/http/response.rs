//! Outbound response with helper methods.
//!
//! # Responsibilities
//! - Buffer status, headers and body until dispatch completes
//! - Provide the send/json/redirect/render helpers handlers write with
//! - Run commit hooks (session persistence) exactly once before flushing
//!
//! # Design Decisions
//! - The first terminal helper wins; later ones are ignored with a warning
//! - Headers are frozen once a terminal helper ran, except for commit hooks
//! - The identifying header follows the `x-powered-by` setting

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::http::{HttpError, Request};
use crate::routing::settings::{self, Settings, SettingsChain};
use crate::runtime::Runtime;
use crate::session::cookie;
use crate::views::TemplateError;

/// Value of the identifying response header.
pub const POWERED_BY: &str = "PortalRuntime";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const APPLICATION_JSON: &str = "application/json; charset=utf-8";

/// Callback run after dispatch, immediately before the response is flushed.
pub type CommitHook = Box<dyn FnOnce(&mut Request, &mut Response) + Send>;

/// Body accepted by [`Response::send`].
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Empty
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(b))
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Payload::Empty,
            Value::String(s) => Payload::Text(s),
            other => Payload::Json(other),
        }
    }
}

/// The response under construction for one request.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    stream: Option<Body>,
    finished: bool,
    close: bool,
    settings: SettingsChain,
    runtime: Arc<Runtime>,
    commit_hooks: Vec<CommitHook>,

    /// Values shared between handlers of one request; merged under the
    /// explicit locals passed to `render`.
    pub locals: Map<String, Value>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            stream: None,
            finished: false,
            close: false,
            settings: SettingsChain::default(),
            runtime,
            commit_hooks: Vec::new(),
            locals: Map::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Buffered body; empty when the response is streamed.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// A header value, if present and valid UTF-8.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes()).ok()?;
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether a terminal helper already completed the response.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Settings visible from the current layer.
    pub fn settings(&self) -> &SettingsChain {
        &self.settings
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        if self.guard_frozen("status") {
            self.status = status;
        }
        self
    }

    /// Replace a header.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        if self.guard_frozen("set") {
            if let Some((name, value)) = header_pair(name.as_ref(), value.as_ref()) {
                self.headers.insert(name, value);
            }
        }
        self
    }

    /// Add a header value, keeping any existing values for the same name.
    pub fn append_header(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        if self.guard_frozen("append_header") {
            self.push_header(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Queue an expiring cookie for `name`.
    pub fn clear_cookie(&mut self, name: &str) -> &mut Self {
        self.append_header(header::SET_COOKIE, cookie::expire(name))
    }

    /// Ask the transport to close the connection after this response.
    pub fn close_connection(&mut self) -> &mut Self {
        self.close = true;
        self
    }

    /// Register a commit hook.
    pub fn on_commit(&mut self, hook: CommitHook) {
        self.commit_hooks.push(hook);
    }

    /// Finish with a text, binary or JSON body.
    pub fn send(&mut self, payload: impl Into<Payload>) {
        if !self.begin_terminal("send") {
            return;
        }
        let body = match payload.into() {
            Payload::Empty => Bytes::new(),
            Payload::Text(text) => {
                self.default_content_type(TEXT_PLAIN);
                Bytes::from(text)
            }
            Payload::Bytes(bytes) => bytes,
            Payload::Json(value) => {
                self.headers
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
                Bytes::from(value.to_string())
            }
        };
        self.complete(body);
    }

    /// Finish with a binary body, leaving the content type as set.
    pub fn send_bytes(&mut self, bytes: impl Into<Bytes>) {
        self.send(Payload::Bytes(bytes.into()));
    }

    /// Finish with a body that is forwarded chunk by chunk as it is produced.
    pub fn send_stream(&mut self, body: Body) {
        if !self.begin_terminal("send_stream") {
            return;
        }
        self.stream = Some(body);
        self.complete(Bytes::new());
    }

    /// Finish with `data` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<(), HttpError> {
        let encoded = serde_json::to_vec(data)?;
        if !self.begin_terminal("json") {
            return Ok(());
        }
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        self.complete(Bytes::from(encoded));
        Ok(())
    }

    /// Finish with the numeric status code as the body.
    pub fn send_status(&mut self, status: StatusCode) {
        self.status(status);
        self.send(status.as_u16().to_string());
    }

    /// Redirect with `302 Found`.
    pub fn redirect(&mut self, location: &str) {
        self.redirect_with(StatusCode::FOUND, location);
    }

    /// Redirect with an explicit status.
    pub fn redirect_with(&mut self, status: StatusCode, location: &str) {
        if !self.begin_terminal("redirect") {
            return;
        }
        self.status = status;
        match HeaderValue::from_str(location) {
            Ok(value) => {
                self.headers.insert(header::LOCATION, value);
            }
            Err(_) => {
                tracing::warn!(location = %location, "Redirect target is not a valid header value")
            }
        }
        self.complete(Bytes::new());
    }

    /// Finish with whatever body has been set so far (empty).
    pub fn end(&mut self) {
        if self.begin_terminal("end") {
            self.complete(Bytes::new());
        }
    }

    /// Render `<views>/<view>.<view engine>` and finish with the HTML.
    pub async fn render(&mut self, view: &str, locals: impl Serialize) -> Result<(), HttpError> {
        let (Some(dir), Some(engine)) = (
            self.settings.resolve_str(settings::VIEWS),
            self.settings.resolve_str(settings::VIEW_ENGINE),
        ) else {
            return Err(HttpError::ViewNotConfigured);
        };
        let path = PathBuf::from(dir).join(format!("{view}.{engine}"));

        let mut merged = self.locals.clone();
        match serde_json::to_value(locals)? {
            Value::Object(explicit) => merged.extend(explicit),
            Value::Null => {}
            _ => return Err(TemplateError::InvalidLocals.into()),
        }

        let runtime = Arc::clone(&self.runtime);
        let html = runtime.templates().render_file(&path, &merged).await?;

        if !self.begin_terminal("render") {
            return Ok(());
        }
        self.default_content_type(TEXT_HTML);
        self.complete(Bytes::from(html));
        Ok(())
    }

    pub(crate) fn push_settings(&mut self, settings: Arc<Settings>) {
        self.settings.push(settings);
    }

    pub(crate) fn pop_settings(&mut self) {
        self.settings.pop();
    }

    /// Finish a response the application left open.
    pub(crate) fn fallback(&mut self, status: StatusCode, body: &str) {
        self.status = status;
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        self.finished = true;
        self.add_powered_by();
        self.body = Bytes::from(body.to_string());
        self.stream = None;
    }

    /// Append a header regardless of the finished state. Commit hooks use this.
    pub(crate) fn push_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.headers.append(name, value);
        }
    }

    pub(crate) fn take_commit_hooks(&mut self) -> Vec<CommitHook> {
        std::mem::take(&mut self.commit_hooks)
    }

    /// Convert into the transport response.
    pub(crate) fn into_http(self) -> axum::http::Response<Body> {
        let body = match self.stream {
            Some(stream) => stream,
            None => Body::from(self.body),
        };
        let mut response = axum::http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if self.close {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }

    fn begin_terminal(&mut self, helper: &'static str) -> bool {
        if self.finished {
            tracing::warn!(helper, "Response already finished; ignoring write");
            return false;
        }
        true
    }

    fn guard_frozen(&self, helper: &'static str) -> bool {
        if self.finished {
            tracing::warn!(helper, "Response already finished; headers are frozen");
            return false;
        }
        true
    }

    fn complete(&mut self, body: Bytes) {
        self.add_powered_by();
        self.body = body;
        self.finished = true;
    }

    fn default_content_type(&mut self, value: &'static str) {
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(value));
        }
    }

    fn add_powered_by(&mut self) {
        if self.settings.enabled(settings::X_POWERED_BY)
            && !self.headers.contains_key("x-powered-by")
        {
            self.headers
                .insert("x-powered-by", HeaderValue::from_static(POWERED_BY));
        }
    }
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            tracing::warn!(header = %name, "Invalid header name or value; skipped");
            None
        }
    }
}
