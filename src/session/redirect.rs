use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, HeaderValue, StatusCode};

use super::{BoxFuture, Entered, Session, ready};
use crate::error::Result;
use crate::response::ResponseSink;
use crate::status::RedirectCode;

/// External redirect: a 3xx status, a `Location` header and no body.
pub struct RedirectSession {
    code: RedirectCode,
    location: String,
}

impl RedirectSession {
    pub fn new(location: impl Into<String>, code: RedirectCode) -> Self {
        Self { code, location: location.into() }
    }
}

impl Session for RedirectSession {
    fn enter(&mut self) -> BoxFuture<'_, Result<Entered>> {
        ready(Ok(Entered::Proceed))
    }

    fn begin_response(&mut self, headers: &mut HeaderMap) -> StatusCode {
        match HeaderValue::try_from(self.location.as_str()) {
            Ok(value) => {
                headers.append(LOCATION, value);
                self.code.into()
            }
            // A location that cannot be a header value cannot be followed.
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn write_response<'a>(&'a mut self, _sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>> {
        ready(Ok(None))
    }
}

/// `304 Not Modified` with no body.
pub struct NotModifiedSession;

impl Session for NotModifiedSession {
    fn enter(&mut self) -> BoxFuture<'_, Result<Entered>> {
        ready(Ok(Entered::Proceed))
    }

    fn begin_response(&mut self, _headers: &mut HeaderMap) -> StatusCode {
        StatusCode::NOT_MODIFIED
    }

    fn write_response<'a>(&'a mut self, _sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>> {
        ready(Ok(None))
    }
}

/// Internal alias: always redirects, inside the server, to a fixed path.
///
/// This is how private (`@`-prefixed) routes are reached: a public route
/// hands out an alias session pointing at the private one. An alias never
/// answers on its own; if something drives it to the response phases anyway
/// it answers `403 Forbidden`.
pub struct AliasSession {
    target: String,
}

impl AliasSession {
    /// An empty target aliases the root path.
    pub fn new(target: impl Into<String>) -> Self {
        let target = target.into();
        let target = if target.is_empty() { "/".to_owned() } else { target };
        Self { target }
    }
}

impl Session for AliasSession {
    fn enter(&mut self) -> BoxFuture<'_, Result<Entered>> {
        ready(Ok(Entered::Redirect(self.target.clone())))
    }

    fn begin_response(&mut self, _headers: &mut HeaderMap) -> StatusCode {
        StatusCode::FORBIDDEN
    }

    fn write_response<'a>(&'a mut self, _sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>> {
        ready(Ok(Some(Bytes::from_static(b"Nothing content in Alias"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Response;

    #[tokio::test]
    async fn redirect_sets_location_and_no_body() {
        let mut session = RedirectSession::new("/login", RedirectCode::Found);
        let mut out = Response::new();
        assert_eq!(session.begin_response(out.headers_mut()), StatusCode::FOUND);
        assert_eq!(out.headers()[LOCATION], "/login");
        assert_eq!(session.write_response(&mut out).await.unwrap(), None);
    }

    #[test]
    fn empty_alias_points_at_root() {
        assert_eq!(AliasSession::new("").target, "/");
    }

    #[tokio::test]
    async fn alias_answers_forbidden_when_driven_directly() {
        let mut session = AliasSession::new("/@x");
        let mut out = Response::new();
        assert_eq!(session.begin_response(out.headers_mut()), StatusCode::FORBIDDEN);
        let body = session.write_response(&mut out).await.unwrap().unwrap();
        assert_eq!(&body[..], b"Nothing content in Alias");
    }
}
