//! Static file middleware.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::http::{header, Method};
use percent_encoding::percent_decode_str;
use tokio_util::io::ReaderStream;

use crate::http::{HttpError, Request, Response};
use crate::routing::{Flow, Handler, HandlerFuture};

/// Read size per streamed chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Serves files below a root directory, falling through when nothing matches.
#[derive(Debug, Clone)]
pub struct ServeStatic {
    root: PathBuf,
    index: Option<String>,
}

impl ServeStatic {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Some("index.html".to_string()),
        }
    }

    /// File served for paths ending in `/`; `None` disables index lookup.
    pub fn index(mut self, index: Option<&str>) -> Self {
        self.index = index.map(str::to_string);
        self
    }

    /// Map a request path to a file under the root.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let decoded = percent_decode_str(path).decode_utf8().ok()?;
        let relative = decoded.trim_start_matches('/');

        let mut target = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => target.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        if decoded.ends_with('/') {
            target.push(self.index.as_deref()?);
        }
        Some(target)
    }

    async fn serve(&self, req: &mut Request, res: &mut Response) -> Result<Flow, HttpError> {
        if req.method != Method::GET && req.method != Method::HEAD {
            return Ok(Flow::Next);
        }
        let Some(path) = self.resolve(req.path()) else {
            return Ok(Flow::Next);
        };

        let len = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(Flow::Next),
        };

        tracing::debug!(path = %path.display(), bytes = len, "Serving static file");
        if req.method == Method::HEAD {
            res.set(header::CONTENT_TYPE, content_type_for(&path))
                .set(header::CONTENT_LENGTH, len.to_string());
            res.end();
            return Ok(Flow::Done);
        }

        let file = tokio::fs::File::open(&path).await?;
        res.set(header::CONTENT_TYPE, content_type_for(&path))
            .set(header::CONTENT_LENGTH, len.to_string());
        res.send_stream(Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE)));
        Ok(Flow::Done)
    }
}

impl Handler for ServeStatic {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(req, res))
    }
}

/// Create a static file middleware rooted at `root`.
pub fn serve_static(root: impl Into<PathBuf>) -> ServeStatic {
    ServeStatic::new(root)
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
