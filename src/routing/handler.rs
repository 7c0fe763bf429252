//! Handler traits and the continuation value they resolve to.

use futures_util::future::BoxFuture;

use crate::http::{HttpError, Request, Response};

/// How dispatch proceeds once a handler completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next matching layer. From an error handler this
    /// also clears the pending error.
    Next,
    /// Stop walking the layer list.
    Done,
}

/// Future returned by every handler. A failure becomes the pending error.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<Flow, HttpError>>;

/// A middleware or route handler.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a>;
}

/// A handler that only runs while an error is pending.
pub trait ErrorHandler: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        err: HttpError,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> HandlerFuture<'a>;
}

/// Adapts a closure into a [`Handler`].
pub struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        (self.0)(req, res)
    }
}

/// Adapts a closure into an [`ErrorHandler`].
pub struct FnErrorHandler<F>(pub F);

impl<F> ErrorHandler for FnErrorHandler<F>
where
    F: for<'a> Fn(HttpError, &'a mut Request, &'a mut Response) -> HandlerFuture<'a>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        err: HttpError,
        req: &'a mut Request,
        res: &'a mut Response,
    ) -> HandlerFuture<'a> {
        (self.0)(err, req, res)
    }
}
