//! JSON and url-encoded body parsers.
//!
//! Both parsers skip GET/HEAD, bodies already parsed by an earlier layer,
//! and foreign media types. Bodies are collected incrementally under a byte
//! cap; crossing it fails the request with 413 and closes the connection.

use axum::http::Method;
use serde_json::{Map, Value};

use crate::http::{HttpError, Request, Response};
use crate::routing::{Flow, Handler, HandlerFuture};

/// Default request body cap in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 1_000_000;

const APPLICATION_JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    UrlEncoded,
}

impl Format {
    fn media_type(self) -> &'static str {
        match self {
            Format::Json => APPLICATION_JSON,
            Format::UrlEncoded => FORM_URLENCODED,
        }
    }
}

/// Body-parsing middleware for one media type.
#[derive(Debug, Clone, Copy)]
pub struct BodyParser {
    format: Format,
    limit: usize,
}

impl BodyParser {
    /// Override the byte cap.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn applies_to(&self, req: &Request) -> bool {
        if req.method == Method::GET || req.method == Method::HEAD || req.is_body_parsed() {
            return false;
        }
        req.content_type().as_deref() == Some(self.format.media_type())
    }

    async fn parse(&self, req: &mut Request, res: &mut Response) -> Result<Flow, HttpError> {
        if !self.applies_to(req) {
            return Ok(Flow::Next);
        }

        let bytes = match req.read_body(self.limit).await {
            Ok(bytes) => bytes,
            Err(err) => {
                if matches!(err, HttpError::PayloadTooLarge) {
                    tracing::warn!(
                        limit = self.limit,
                        "Request body over limit; closing connection"
                    );
                    res.close_connection();
                }
                return Err(err);
            }
        };

        let body = match self.format {
            Format::Json => parse_json(&bytes)?,
            Format::UrlEncoded => parse_urlencoded(&bytes),
        };
        req.set_parsed_body(body);
        Ok(Flow::Next)
    }
}

impl Handler for BodyParser {
    fn call<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.parse(req, res))
    }
}

/// Parse `application/json` bodies into `req.body`.
pub fn json() -> BodyParser {
    BodyParser {
        format: Format::Json,
        limit: DEFAULT_BODY_LIMIT,
    }
}

/// Parse `application/x-www-form-urlencoded` bodies into `req.body`.
pub fn urlencoded() -> BodyParser {
    BodyParser {
        format: Format::UrlEncoded,
        limit: DEFAULT_BODY_LIMIT,
    }
}

fn parse_json(bytes: &[u8]) -> Result<Value, HttpError> {
    if bytes.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(bytes)
        .map_err(|e| HttpError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Repeated keys collect into an array of strings.
fn parse_urlencoded(bytes: &[u8]) -> Value {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(bytes).into_owned() {
        match fields.get_mut(&key) {
            None => {
                fields.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    Value::Object(fields)
}
