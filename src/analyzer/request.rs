//! Captured request/response representations.
//!
//! A [`CaptureRequest`] keeps its cookies out of the header map so that cookie
//! subsets can be swapped without string surgery; the `Cookie` header is
//! rendered on demand. [`CaptureRequest::with_cookies_only`] is the one pure
//! transformation the solver relies on: it can strip cookies but can never
//! introduce one that was not captured.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use http::Method;
use url::Url;

use super::cookie::{Cookie, CookieId};

/// An HTTP request captured from the host proxy.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    cookies: Vec<Cookie>,
}

impl CaptureRequest {
    /// Start a request with no headers, body, or cookies.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            cookies: Vec::new(),
        }
    }

    /// Attach a header. A `Cookie` header is parsed into cookie handles
    /// instead of being stored verbatim.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name == COOKIE {
            if let Ok(raw) = value.to_str() {
                for (cookie_name, cookie_value) in parse_cookie_header(raw) {
                    self = self.with_cookie(cookie_name, cookie_value);
                }
            }
            return self;
        }
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Append a cookie. The handle id is its capture position.
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let id = CookieId(self.cookies.len());
        self.cookies.push(Cookie::new(id, name, value));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host component of the request URL, if any.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Headers excluding the `Cookie` header (see [`cookie_header`](Self::cookie_header)).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn cookie(&self, id: CookieId) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.id() == id)
    }

    /// Produce a request carrying exactly the named cookie subset, in the
    /// order given. Ids that are not part of this request are ignored, so the
    /// result can never gain a cookie the original did not have.
    pub fn with_cookies_only(&self, keep: &[CookieId]) -> CaptureRequest {
        let cookies = keep
            .iter()
            .filter_map(|id| self.cookie(*id))
            .cloned()
            .collect();
        CaptureRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            cookies,
        }
    }

    /// Render the `Cookie` header value, or `None` when no cookies remain.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={}", c.name(), c.value()))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Split a raw `Cookie` header value into name/value pairs.
pub fn parse_cookie_header(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            match pair.split_once('=') {
                Some((name, value)) if !name.trim().is_empty() => {
                    Some((name.trim().to_string(), value.trim().to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// An HTTP response as returned by the replay transport.
#[derive(Debug, Clone)]
pub struct CaptureResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl CaptureResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
