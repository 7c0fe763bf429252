//! A single registered entry in an application's layer list.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::Method;
use futures_util::FutureExt;

use crate::http::{HttpError, Request, Response};
use crate::routing::handler::{ErrorHandler, Flow, Handler, HandlerFuture};
use crate::routing::matcher::{Params, PathPattern, PrefixMatcher};
use crate::routing::router::App;

/// What a layer matches against.
pub(crate) enum Kind {
    /// Boundary-aligned prefix; the prefix is stripped while the layer runs.
    Middleware(PrefixMatcher),
    /// Exact method and full-path pattern.
    Route { method: Method, pattern: PathPattern },
}

/// What a layer runs.
pub(crate) enum Endpoint {
    Handler(Box<dyn Handler>),
    Error(Box<dyn ErrorHandler>),
    Router(Arc<App>),
}

pub(crate) struct Layer {
    pub(crate) kind: Kind,
    pub(crate) endpoint: Endpoint,
}

/// Outcome of matching a layer against the current request.
pub(crate) enum Match {
    Skip,
    Middleware,
    Route(Params),
}

impl Layer {
    pub(crate) fn middleware(prefix: PrefixMatcher, endpoint: Endpoint) -> Self {
        Self {
            kind: Kind::Middleware(prefix),
            endpoint,
        }
    }

    pub(crate) fn route(method: Method, pattern: PathPattern, endpoint: Endpoint) -> Self {
        Self {
            kind: Kind::Route { method, pattern },
            endpoint,
        }
    }

    pub(crate) fn is_error_handler(&self) -> bool {
        matches!(self.endpoint, Endpoint::Error(_))
    }

    pub(crate) fn matches(&self, req: &Request) -> Match {
        match &self.kind {
            Kind::Middleware(prefix) if prefix.matches(req.path()) => Match::Middleware,
            Kind::Route { method, pattern } if *method == req.method => {
                pattern.captures(req.path()).map_or(Match::Skip, Match::Route)
            }
            _ => Match::Skip,
        }
    }

    pub(crate) fn prefix(&self) -> Option<&PrefixMatcher> {
        match &self.kind {
            Kind::Middleware(prefix) => Some(prefix),
            Kind::Route { .. } => None,
        }
    }

    /// Human-readable description for dispatch logs.
    pub(crate) fn describe(&self) -> String {
        match &self.kind {
            Kind::Middleware(prefix) => format!("use {}", prefix.as_str()),
            Kind::Route { method, pattern } => format!("{} {}", method, pattern.as_str()),
        }
    }

    /// Run the endpoint, converting panics into the pending error.
    ///
    /// `pending` is only consumed by error handlers; other endpoints get `None`.
    pub(crate) async fn invoke(
        &self,
        pending: Option<HttpError>,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<Flow, HttpError> {
        match &self.endpoint {
            Endpoint::Handler(handler) => {
                let handler: &dyn Handler = handler.as_ref();
                let (r, s) = (&mut *req, &mut *res);
                // Rebind so the closure is FnOnce.
                let future = std::panic::catch_unwind(AssertUnwindSafe(move || {
                    let (r, s) = (r, s);
                    handler.call(r, s)
                }))
                .map_err(HttpError::from_panic)?;
                guard(future).await
            }
            Endpoint::Error(handler) => {
                let Some(err) = pending else {
                    return Ok(Flow::Next);
                };
                let handler: &dyn ErrorHandler = handler.as_ref();
                let (r, s) = (&mut *req, &mut *res);
                let future = std::panic::catch_unwind(AssertUnwindSafe(move || {
                    let (r, s) = (r, s);
                    handler.call(err, r, s)
                }))
                .map_err(HttpError::from_panic)?;
                guard(future).await
            }
            Endpoint::Router(app) => app.dispatch(req, res).await,
        }
    }
}

async fn guard(future: HandlerFuture<'_>) -> Result<Flow, HttpError> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HttpError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::handler::{FnErrorHandler, FnHandler};
    use crate::runtime::Runtime;
    use axum::body::Body;

    fn context() -> (Request, Response) {
        let req = Request::from_http(
            axum::http::Request::builder()
                .uri("/boom")
                .body(Body::empty())
                .unwrap(),
        );
        (req, Response::new(Arc::new(Runtime::new())))
    }

    fn route(endpoint: Endpoint) -> Layer {
        Layer::route(Method::GET, PathPattern::parse("/boom").unwrap(), endpoint)
    }

    fn sync_panic<'a>(_req: &'a mut Request, _res: &'a mut Response) -> HandlerFuture<'a> {
        panic!("sync")
    }

    fn async_panic<'a>(_req: &'a mut Request, _res: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async {
            if true {
                panic!("async");
            }
            Ok(Flow::Next)
        })
    }

    fn report<'a>(
        err: HttpError,
        _req: &'a mut Request,
        res: &'a mut Response,
    ) -> HandlerFuture<'a> {
        res.send(err.to_string());
        Box::pin(async { Ok(Flow::Done) })
    }

    #[tokio::test]
    async fn test_sync_and_async_panics_become_errors() {
        let (mut req, mut res) = context();

        let layer = route(Endpoint::Handler(Box::new(FnHandler(sync_panic))));
        let err = layer.invoke(None, &mut req, &mut res).await.unwrap_err();
        assert_eq!(err.to_string(), "handler panicked: sync");

        let layer = route(Endpoint::Handler(Box::new(FnHandler(async_panic))));
        let err = layer.invoke(None, &mut req, &mut res).await.unwrap_err();
        assert_eq!(err.to_string(), "handler panicked: async");
    }

    #[tokio::test]
    async fn test_error_handler_receives_pending_error() {
        let (mut req, mut res) = context();
        let layer = route(Endpoint::Error(Box::new(FnErrorHandler(report))));
        assert!(layer.is_error_handler());

        let flow = layer
            .invoke(Some(HttpError::BadRequest("nope".into())), &mut req, &mut res)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Done);
        assert!(res.is_finished());

        let flow = layer.invoke(None, &mut req, &mut res).await.unwrap();
        assert_eq!(flow, Flow::Next);
    }
}
