//! Cookie header parsing and `Set-Cookie` serialization.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::http::{Request, Response};
use crate::routing::{Flow, Handler, HandlerFuture};

/// Parsed request cookies.
pub type Cookies = HashMap<String, String>;

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[serde(alias = "Strict", alias = "STRICT")]
    Strict,
    #[serde(alias = "Lax", alias = "LAX")]
    Lax,
    #[serde(alias = "None", alias = "NONE")]
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// Attributes applied to a serialized cookie. `Path=/` is always emitted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieOptions {
    /// Lifetime; emitted as whole seconds in `Max-Age`.
    #[serde(rename = "max_age_ms", with = "duration_ms")]
    pub max_age: Option<Duration>,

    /// Emit `HttpOnly`.
    pub http_only: bool,

    pub same_site: Option<SameSite>,

    /// Emit `Secure`.
    pub secure: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            max_age: None,
            http_only: true,
            same_site: None,
            secure: false,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Parse a `Cookie` header value into a name → value map.
///
/// Values are percent-decoded; a value that does not decode is kept raw.
/// Entries without a name are ignored.
pub fn parse(header: &str) -> Cookies {
    let mut cookies = Cookies::new();
    for part in header.split(';') {
        let (name, value) = part.split_once('=').unwrap_or((part, ""));
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        let decoded = percent_decode_str(value)
            .decode_utf8()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        cookies.insert(name.to_string(), decoded);
    }
    cookies
}

/// Build a `Set-Cookie` value.
pub fn serialize(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut parts = vec![format!("{name}={value}"), "Path=/".to_string()];
    if let Some(max_age) = options.max_age {
        parts.push(format!("Max-Age={}", max_age.as_secs()));
    }
    if options.http_only {
        parts.push("HttpOnly".to_string());
    }
    if let Some(same_site) = options.same_site {
        parts.push(format!("SameSite={same_site}"));
    }
    if options.secure {
        parts.push("Secure".to_string());
    }
    parts.join("; ")
}

/// A `Set-Cookie` value that makes the browser drop `name` immediately.
pub fn expire(name: &str) -> String {
    format!("{name}=; Path=/; Max-Age=0")
}

/// Middleware that fills `req.cookies` from the `Cookie` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieParser;

impl Handler for CookieParser {
    fn call<'a>(&'a self, req: &'a mut Request, _res: &'a mut Response) -> HandlerFuture<'a> {
        let header = req
            .header(axum::http::header::COOKIE)
            .unwrap_or_default()
            .to_string();
        req.cookies = parse(&header);
        Box::pin(async { Ok(Flow::Next) })
    }
}

/// Create the cookie-parsing middleware.
pub fn cookie_parser() -> CookieParser {
    CookieParser
}
