//! Session middleware.

use std::sync::Arc;

use axum::http::header;

use crate::config::SessionConfig;
use crate::http::{Request, Response};
use crate::routing::{Flow, Handler, HandlerFuture};
use crate::session::{cookie, Session};

/// Installs `req.session` and commits it before the response is flushed.
#[derive(Debug, Clone)]
pub struct SessionMiddleware {
    config: Arc<SessionConfig>,
}

impl SessionMiddleware {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn install(&self, req: &mut Request, res: &mut Response) {
        if req.cookies.is_empty() {
            if let Some(raw) = req.header(header::COOKIE) {
                req.cookies = cookie::parse(raw);
            }
        }

        let store = res.runtime().sessions().clone();
        let config = Arc::clone(&self.config);
        let session = match req.cookies.get(&config.name) {
            Some(id) => match store.load(id) {
                Some(record) => Session::resume(id.clone(), record, store, config),
                None => {
                    tracing::debug!(
                        session_id = %id,
                        "Unknown or expired session id; starting anonymous"
                    );
                    Session::anonymous(store, config)
                }
            },
            None => Session::anonymous(store, config),
        };
        req.session = Some(session);

        res.on_commit(Box::new(|req: &mut Request, res: &mut Response| {
            if let Some(set_cookie) = req.session.as_mut().and_then(Session::commit) {
                res.push_header(header::SET_COOKIE.as_str(), &set_cookie);
            }
        }));
    }
}

impl Handler for SessionMiddleware {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        self.install(req, res);
        Box::pin(async { Ok(Flow::Next) })
    }
}

/// Create the session middleware.
pub fn session(config: SessionConfig) -> SessionMiddleware {
    SessionMiddleware::new(config)
}
