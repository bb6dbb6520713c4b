//! Outgoing response: the transport sink sessions write into.
//!
//! The dispatcher writes status, headers and body into a [`Response`] buffer
//! and the server turns it into a hyper response once the session is done.
//! Buffering is what lets the dispatcher replace a half-written body with an
//! error page when a session fails in its write phase.

use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values, and a guess from a file extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,          // text/css
    Csv,          // text/csv
    Gif,          // image/gif
    Html,         // text/html; charset=utf-8
    Ico,          // image/x-icon
    Jpeg,         // image/jpeg
    JavaScript,   // text/javascript
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Wasm,         // application/wasm
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css",
            Self::Csv         => "text/csv",
            Self::Gif         => "image/gif",
            Self::Html        => "text/html; charset=utf-8",
            Self::Ico         => "image/x-icon",
            Self::Jpeg        => "image/jpeg",
            Self::JavaScript  => "text/javascript",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Wasm        => "application/wasm",
            Self::Xml         => "application/xml",
        }
    }

    /// Guess from a file extension (case-insensitive). Unknown → octet-stream.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css"          => Self::Css,
            "csv"          => Self::Csv,
            "gif"          => Self::Gif,
            "htm" | "html" => Self::Html,
            "ico"          => Self::Ico,
            "jpg" | "jpeg" => Self::Jpeg,
            "js" | "mjs"   => Self::JavaScript,
            "json"         => Self::Json,
            "pdf"          => Self::Pdf,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            "wasm"         => Self::Wasm,
            "xml"          => Self::Xml,
            _              => Self::OctetStream,
        }
    }

    pub fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── ResponseSink ──────────────────────────────────────────────────────────────

/// The transport side of a response, as sessions see it.
pub trait ResponseSink: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sets the status. Only the first call has an effect.
    fn write_status(&mut self, status: StatusCode);

    fn write_bytes(&mut self, data: &[u8]) -> std::io::Result<()>;
}

// ── Response ──────────────────────────────────────────────────────────────────

/// A fully buffered outgoing response.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    status_written: bool,
    headers: HeaderMap,
    body: BytesMut,
}

impl Response {
    /// `200 OK`, no headers, empty body.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            status_written: false,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
        }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    /// `Content-Type`, if set and valid UTF-8.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl Default for Response {
    fn default() -> Self { Self::new() }
}

impl ResponseSink for Response {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        Response::headers_mut(self)
    }

    fn write_status(&mut self, status: StatusCode) {
        if !self.status_written {
            self.status = status;
            self.status_written = true;
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.body.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_status_wins() {
        let mut out = Response::new();
        out.write_status(StatusCode::CREATED);
        out.write_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(out.status(), StatusCode::CREATED);
    }

    #[test]
    fn into_inner_carries_everything() {
        let mut out = Response::new();
        out.headers_mut().insert("x-test", HeaderValue::from_static("1"));
        out.write_status(StatusCode::ACCEPTED);
        out.write_bytes(b"he").unwrap();
        out.write_bytes(b"llo").unwrap();

        let inner = out.into_inner();
        assert_eq!(inner.status(), StatusCode::ACCEPTED);
        assert_eq!(inner.headers()["x-test"], "1");
    }

    #[test]
    fn guesses_content_type_from_extension() {
        assert_eq!(ContentType::from_extension("HTML"), ContentType::Html);
        assert_eq!(ContentType::from_extension("js"), ContentType::JavaScript);
        assert_eq!(ContentType::from_extension("bin"), ContentType::OctetStream);
    }
}
