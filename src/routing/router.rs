//! Application and router engine.
//!
//! # Responsibilities
//! - Hold the ordered layer list and the application's settings
//! - Walk matching layers for each request, threading the pending error
//! - Compose mounted routers under path prefixes
//! - Finish responses the layers left open (404, error status)
//!
//! # Design Decisions
//! - Immutable once serving starts (shared via `Arc` without locks)
//! - Layers run strictly in registration order; a mounted router is one
//!   step from its parent's point of view
//! - Invalid patterns are rejected at registration, never at request time

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::http::{HttpError, Request, Response};
use crate::observability::metrics;
use crate::routing::handler::{
    ErrorHandler, FnErrorHandler, FnHandler, Flow, Handler, HandlerFuture,
};
use crate::routing::layer::{Endpoint, Layer, Match};
use crate::routing::matcher::{PathPattern, PrefixMatcher, RouteError};
use crate::routing::settings::{self, Settings};
use crate::runtime::Runtime;

/// An application, or a router meant to be mounted into one.
pub struct App {
    layers: Vec<Layer>,
    settings: Arc<Settings>,
    runtime: Arc<Runtime>,
    top_level: bool,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("layers", &self.layers.iter().map(Layer::describe).collect::<Vec<_>>())
            .field("settings", &self.settings)
            .field("top_level", &self.top_level)
            .finish()
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// A top-level application with a fresh runtime.
    pub fn new() -> Self {
        Self::with_runtime(Arc::new(Runtime::new()))
    }

    /// A top-level application sharing an existing runtime.
    pub fn with_runtime(runtime: Arc<Runtime>) -> Self {
        let mut settings = Settings::default();
        settings.set(settings::X_POWERED_BY, true);
        Self {
            layers: Vec::new(),
            settings: Arc::new(settings),
            runtime,
            top_level: true,
        }
    }

    /// A router for mounting. It has no default settings and cannot listen;
    /// when mounted it runs against the receiving application's runtime.
    pub fn router() -> Self {
        Self {
            layers: Vec::new(),
            settings: Arc::new(Settings::default()),
            runtime: Arc::new(Runtime::new()),
            top_level: false,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn is_top_level(&self) -> bool {
        self.top_level
    }

    /// Set a setting on this application.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        Arc::make_mut(&mut self.settings).set(key, value);
        self
    }

    pub fn enable(&mut self, key: &str) -> &mut Self {
        self.set(key, true)
    }

    pub fn disable(&mut self, key: &str) -> &mut Self {
        self.set(key, false)
    }

    /// This application's own value for `key`, without parent fallback.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Register closure middleware under `prefix`.
    pub fn use_fn<F>(&mut self, prefix: &str, f: F) -> Result<&mut Self, RouteError>
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.use_handler(prefix, FnHandler(f))
    }

    /// Register middleware under `prefix`.
    pub fn use_handler(
        &mut self,
        prefix: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        let prefix = PrefixMatcher::new(prefix)?;
        self.layers
            .push(Layer::middleware(prefix, Endpoint::Handler(Box::new(handler))));
        Ok(self)
    }

    /// Register error-handling middleware under `prefix`.
    pub fn use_error<F>(&mut self, prefix: &str, f: F) -> Result<&mut Self, RouteError>
    where
        F: for<'a> Fn(HttpError, &'a mut Request, &'a mut Response) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.use_error_handler(prefix, FnErrorHandler(f))
    }

    pub fn use_error_handler(
        &mut self,
        prefix: &str,
        handler: impl ErrorHandler,
    ) -> Result<&mut Self, RouteError> {
        let prefix = PrefixMatcher::new(prefix)?;
        self.layers
            .push(Layer::middleware(prefix, Endpoint::Error(Box::new(handler))));
        Ok(self)
    }

    /// Mount `router` under `prefix`.
    pub fn mount(&mut self, prefix: &str, router: App) -> Result<&mut Self, RouteError> {
        let prefix = PrefixMatcher::new(prefix)?;
        self.layers
            .push(Layer::middleware(prefix, Endpoint::Router(Arc::new(router))));
        Ok(self)
    }

    pub fn get<F>(&mut self, path: &str, f: F) -> Result<&mut Self, RouteError>
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.route(Method::GET, path, f)
    }

    pub fn post<F>(&mut self, path: &str, f: F) -> Result<&mut Self, RouteError>
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.route(Method::POST, path, f)
    }

    /// Register a closure route for any method.
    pub fn route<F>(&mut self, method: Method, path: &str, f: F) -> Result<&mut Self, RouteError>
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.route_handler(method, path, FnHandler(f))
    }

    pub fn route_handler(
        &mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        let pattern = PathPattern::parse(path)?;
        self.layers
            .push(Layer::route(method, pattern, Endpoint::Handler(Box::new(handler))));
        Ok(self)
    }

    /// Register a route that only runs while an error is pending.
    pub fn route_error<F>(
        &mut self,
        method: Method,
        path: &str,
        f: F,
    ) -> Result<&mut Self, RouteError>
    where
        F: for<'a> Fn(HttpError, &'a mut Request, &'a mut Response) -> HandlerFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        let pattern = PathPattern::parse(path)?;
        self.layers.push(Layer::route(
            method,
            pattern,
            Endpoint::Error(Box::new(FnErrorHandler(f))),
        ));
        Ok(self)
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: axum::http::Request<Body>) -> axum::http::Response<Body> {
        let start = Instant::now();
        let method = request.method().to_string();
        let mut req = Request::from_http(request);
        let mut res = Response::new(Arc::clone(&self.runtime));

        res.push_settings(Arc::clone(&self.settings));
        let outcome = self.walk(&mut req, &mut res).await;
        finalize(outcome, &req, &mut res);

        for hook in res.take_commit_hooks() {
            hook(&mut req, &mut res);
        }

        let status = res.status_code();
        tracing::debug!(
            method = %method,
            url = %req.original_url(),
            status = status.as_u16(),
            "Request complete"
        );
        let response = res.into_http();
        metrics::record_request(&method, status.as_u16(), start);
        response
    }

    /// Run this application's layers as one step of an enclosing application.
    pub(crate) fn dispatch<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> BoxFuture<'a, Result<Flow, HttpError>> {
        Box::pin(async move {
            res.push_settings(Arc::clone(&self.settings));
            let outcome = self.walk(req, res).await;
            res.pop_settings();
            outcome
        })
    }

    async fn walk(&self, req: &mut Request, res: &mut Response) -> Result<Flow, HttpError> {
        let mut pending: Option<HttpError> = None;

        for layer in &self.layers {
            // Regular layers are skipped while an error is pending, error
            // layers while none is.
            if layer.is_error_handler() != pending.is_some() {
                continue;
            }

            let params = match layer.matches(req) {
                Match::Skip => continue,
                Match::Middleware => None,
                Match::Route(params) => Some(params),
            };

            tracing::debug!(
                layer = %layer.describe(),
                path = %req.path(),
                base_url = %req.base_url(),
                "Dispatching layer"
            );

            let err = pending.take();
            let outcome = match (params, layer.prefix()) {
                (Some(params), _) => {
                    req.mark_handled(params);
                    layer.invoke(err, req, res).await
                }
                (None, Some(prefix)) => {
                    let saved = req.enter(prefix);
                    let outcome = layer.invoke(err, req, res).await;
                    req.restore(saved);
                    outcome
                }
                (None, None) => layer.invoke(err, req, res).await,
            };

            match outcome {
                Ok(Flow::Next) => {}
                Ok(Flow::Done) => return Ok(Flow::Done),
                Err(e) => {
                    tracing::debug!(layer = %layer.describe(), error = %e, "Layer failed");
                    pending = Some(e);
                }
            }
        }

        match pending {
            Some(err) => Err(err),
            None => Ok(Flow::Next),
        }
    }
}

/// Finish a response the layers left open.
fn finalize(outcome: Result<Flow, HttpError>, req: &Request, res: &mut Response) {
    if res.is_finished() {
        if let Err(err) = outcome {
            tracing::warn!(
                url = %req.original_url(),
                error = %err,
                "Error after response was sent"
            );
        }
        return;
    }

    match outcome {
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                tracing::error!(
                    url = %req.original_url(),
                    status = status.as_u16(),
                    error = %err,
                    "Unhandled error"
                );
            } else {
                tracing::warn!(
                    url = %req.original_url(),
                    status = status.as_u16(),
                    error = %err,
                    "Request failed"
                );
            }
            res.fallback(status, status.canonical_reason().unwrap_or("Error"));
        }
        Ok(_) if !req.is_handled() => res.fallback(StatusCode::NOT_FOUND, "Not Found"),
        Ok(_) => res.end(),
    }
}
