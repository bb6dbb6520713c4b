//! Per-request context.
//!
//! A [`RequestContext`] is built once per inbound request. Routers consume
//! leading segments of its *relative path* as they descend the route tree;
//! an internal redirect replaces the whole path and marks the request as
//! redirected. The relative path is stored as an offset into the full path,
//! so it is always a suffix of it.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Typed body readers never parse more than this, whatever the configuration.
pub const CONTENT_READ_HARD_LIMIT: usize = 8 * 1024 * 1024;

/// Splits a URL path into its non-empty segments.
///
/// ```rust
/// use switchyard::split_path;
///
/// assert_eq!(split_path("/a//b/"), vec!["a", "b"]);
/// assert!(split_path("/").is_empty());
/// ```
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

/// One cookie from the request's `Cookie` headers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug)]
struct RequestHead {
    method: String,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
}

/// An inbound request as seen by routers and handlers.
///
/// Cloning is cheap: the method, URI and headers are shared.
#[derive(Clone, Debug)]
pub struct RequestContext {
    head: Arc<RequestHead>,
    body: Bytes,
    full_path: Vec<String>,
    rel_start: usize,
    redirected: bool,
    body_limit: usize,
}

impl RequestContext {
    /// A body-less request, mostly useful in tests.
    pub fn new(method: &str, uri: &str) -> Result<Self> {
        let uri: Uri = uri
            .parse()
            .map_err(|source| Error::InvalidUri { uri: uri.to_owned(), source })?;
        Ok(Self::from_head(method.to_owned(), uri, HeaderMap::new(), Bytes::new()))
    }

    /// Builds a context from an already collected request.
    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self::from_head(parts.method.as_str().to_owned(), parts.uri, parts.headers, body)
    }

    fn from_head(method: String, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let full_path = split_path(uri.path());
        Self {
            head: Arc::new(RequestHead { method, uri, headers, remote_addr: None }),
            body,
            full_path,
            rel_start: 0,
            redirected: false,
            body_limit: CONTENT_READ_HARD_LIMIT,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        Arc::make_mut(&mut self.head).headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        Arc::make_mut(&mut self.head).remote_addr = Some(addr);
        self
    }

    /// Caps what [`read_json`](Self::read_json) and
    /// [`read_form`](Self::read_form) will parse.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    // ── Request line and headers ──────────────────────────────────────────────

    pub fn method(&self) -> &str { &self.head.method }
    pub fn uri(&self) -> &Uri { &self.head.uri }
    pub fn raw_query(&self) -> &str { self.head.uri.query().unwrap_or("") }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.head.remote_addr }

    /// Host from the URI authority, falling back to the `Host` header.
    pub fn host(&self) -> &str {
        self.head
            .uri
            .host()
            .or_else(|| self.header(http::header::HOST.as_str()))
            .unwrap_or("")
    }

    /// Header lookup; `None` if absent or not valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Declared `Content-Length`, or the collected body length.
    pub fn content_length(&self) -> usize {
        self.header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.body.len())
    }

    /// Decoded query-string pairs, in order.
    pub fn query(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.raw_query().as_bytes())
            .into_owned()
            .collect()
    }

    /// First value for `key` in the query string.
    pub fn query_value(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.raw_query().as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Every cookie across all `Cookie` headers.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.head
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| Cookie {
                    name: name.to_owned(),
                    value: value.trim().trim_matches('"').to_owned(),
                })
            })
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies().into_iter().find(|c| c.name == name)
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    pub fn body(&self) -> &[u8] { &self.body }

    fn checked_body(&self) -> Result<&[u8]> {
        let limit = self.body_limit.min(CONTENT_READ_HARD_LIMIT);
        if self.body.len() > limit {
            return Err(Error::BodyTooLarge { len: self.body.len(), limit });
        }
        Ok(&self.body)
    }

    pub fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(self.checked_body()?)?)
    }

    /// Parses an `application/x-www-form-urlencoded` body.
    pub fn read_form(&self) -> Result<Vec<(String, String)>> {
        Ok(url::form_urlencoded::parse(self.checked_body()?).into_owned().collect())
    }

    // ── Paths ─────────────────────────────────────────────────────────────────

    /// Every segment of the current path, redirects included.
    pub fn full_path(&self) -> &[String] { &self.full_path }

    /// The segments not yet consumed by a router.
    pub fn rel_path(&self) -> &[String] { &self.full_path[self.rel_start..] }

    pub fn is_redirected(&self) -> bool { self.redirected }

    /// `/a/b`, or an empty string for the root.
    pub fn full_path_str(&self) -> String {
        join_absolute(&self.full_path)
    }

    /// `a/b`, or `./` when nothing is left.
    pub fn rel_path_str(&self) -> String {
        if self.rel_path().is_empty() {
            "./".to_owned()
        } else {
            self.rel_path().join("/")
        }
    }

    /// The prefix consumed so far, as an absolute path (`/` at the root).
    pub fn base_path(&self) -> String {
        let base = join_absolute(&self.full_path[..self.rel_start]);
        if base.is_empty() { "/".to_owned() } else { base }
    }

    /// Removes `prefix` from the front of the relative path.
    ///
    /// Fails without modifying anything if `prefix` is not literally the
    /// leading part of the relative path.
    pub(crate) fn trim_path(&mut self, prefix: &[String]) -> Result<()> {
        let rel = self.rel_path();
        if !rel.starts_with(prefix) {
            return Err(Error::PathDesync {
                prefix: prefix.join("/"),
                relative: rel.join("/"),
            });
        }
        self.rel_start += prefix.len();
        Ok(())
    }

    /// Points the request at `target` for another round of resolution.
    ///
    /// Any query string or fragment on `target` is ignored.
    pub(crate) fn redirect(&mut self, target: &str) {
        let path = target.split(['?', '#']).next().unwrap_or("");
        self.full_path = split_path(path);
        self.rel_start = 0;
        self.redirected = true;
    }

    // ── Debug report ──────────────────────────────────────────────────────────

    /// HTML snapshot of the request for debug-mode error pages.
    pub fn report(&self) -> String {
        let mut out = String::with_capacity(2048);
        out.push_str(
            "<table style=\"border-collapse:collapse;\" border=1>\
             <thead><tr><th style=\"width:180px;\">Field</th>\
             <th style=\"width:350px\">Value</th></tr></thead><tbody>",
        );
        let rows: [(&str, String); 11] = [
            ("raw url", self.head.uri.to_string()),
            ("raw query string", self.raw_query().to_owned()),
            ("method", self.method().to_owned()),
            ("hostname", self.host().to_owned()),
            ("full path", self.full_path_str()),
            ("relative path", self.rel_path_str()),
            ("base path", self.base_path()),
            ("sp. full path", format!("{:?}", self.full_path)),
            ("sp. relative path", format!("{:?}", self.rel_path())),
            ("is redirect", self.redirected.to_string()),
            ("content length", self.content_length().to_string()),
        ];
        for (field, value) in rows {
            let _ = write!(out, "<tr><td>{field}</td><td>{}</td></tr>", escape_html(&value));
        }
        out.push_str("</tbody></table>");

        let query = self.query();
        if !query.is_empty() {
            out.push_str("<div><p>Query parameters:</p><table style=\"border-collapse:collapse;\" border=1><tbody>");
            for (key, value) in &query {
                let _ = write!(
                    out,
                    "<tr><td>{}</td><td>{}</td></tr>",
                    escape_html(key),
                    escape_html(value)
                );
            }
            out.push_str("</tbody></table></div>");
        }

        let cookies = self.cookies();
        if !cookies.is_empty() {
            out.push_str("<div><p>Cookies</p><dl>");
            for cookie in &cookies {
                let _ = write!(
                    out,
                    "<dt>{}</dt><dd>{}</dd>",
                    escape_html(&cookie.name),
                    escape_html(&cookie.value)
                );
            }
            out.push_str("</dl></div>");
        }

        out.push_str("<div><p>all Header</p><ul>");
        for (name, value) in &self.head.headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            let _ = write!(out, "<li>{}: {}</li>", name, escape_html(&value));
        }
        out.push_str("</ul></div>");
        out
    }
}

fn join_absolute(segments: &[String]) -> String {
    segments.iter().fold(String::new(), |mut acc, segment| {
        acc.push('/');
        acc.push_str(segment);
        acc
    })
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&'  => out.push_str("&amp;"),
            '<'  => out.push_str("&lt;"),
            '>'  => out.push_str("&gt;"),
            '"'  => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _    => out.push(c),
        }
    }
    out
}
