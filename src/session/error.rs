use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};

use super::{BoxFuture, BoxedSession, Entered, Session, ready};
use crate::binding::BindingContext;
use crate::error::Result;
use crate::handler::Handler;
use crate::instance::{Instance, SessionEnv};
use crate::request::{RequestContext, escape_html};
use crate::response::ResponseSink;
use crate::status::error_title;

/// An HTML error page with a fixed status.
///
/// The body reads `<h1>{code} {title}</h1><p>{message}</p>`, followed by the
/// debug block when one is given. The message is inserted as-is; escape
/// anything that came from the client.
///
/// Also usable as a [`Handler`] that answers every request with the same page.
#[derive(Clone, Debug)]
pub struct ErrorSession {
    status: StatusCode,
    body: Bytes,
}

impl ErrorSession {
    /// `None` unless `status` is a 4xx/5xx code with a known title.
    pub fn new(status: StatusCode, message: &str, debug: Option<&str>) -> Option<Self> {
        let title = error_title(status)?;
        let code = status.as_u16();
        let body = match debug {
            Some(detail) => format!("<h1>{code} {title}</h1><p>{message}</p>{detail}"),
            None => format!("<h1>{code} {title}</h1><p>{message}</p>"),
        };
        Some(Self { status, body: Bytes::from(body) })
    }

    /// A 500 page. Always constructible.
    pub fn internal(message: &str, debug: Option<&str>) -> Self {
        let title = "Internal Server Error";
        let body = format!("<h1>500 {title}</h1><p>{}</p>{}", message, debug.unwrap_or(""));
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, body: Bytes::from(body) }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Session for ErrorSession {
    fn enter(&mut self) -> BoxFuture<'_, Result<Entered>> {
        ready(Ok(Entered::Proceed))
    }

    fn begin_response(&mut self, headers: &mut HeaderMap) -> StatusCode {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html;charset=utf-8"));
        self.status
    }

    fn write_response<'a>(&'a mut self, _sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>> {
        ready(Ok(Some(self.body.clone())))
    }
}

impl Handler for ErrorSession {
    fn init(&mut self, _instance: &Arc<Instance>, _binding: Option<&BindingContext>) -> Result<()> {
        Ok(())
    }

    fn begin_session(&self, _req: &mut RequestContext, _env: Option<&SessionEnv>) -> Option<BoxedSession> {
        Some(Box::new(self.clone()))
    }
}

/// The error session a router answers with, carrying the request report in
/// debug mode.
pub(crate) fn reject(
    debug: bool,
    req: &RequestContext,
    status: StatusCode,
    message: &str,
) -> Option<BoxedSession> {
    let report = debug.then(|| req.report());
    let session = ErrorSession::new(status, &escape_html(message), report.as_deref())?;
    Some(Box::new(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_title_and_message() {
        let session = ErrorSession::new(StatusCode::NOT_FOUND, "no such page", None).unwrap();
        assert_eq!(session.body(), b"<h1>404 Not Found</h1><p>no such page</p>");
    }

    #[test]
    fn appends_debug_detail() {
        let session =
            ErrorSession::new(StatusCode::FORBIDDEN, "nope", Some("<table></table>")).unwrap();
        assert_eq!(session.body(), b"<h1>403 Forbidden</h1><p>nope</p><table></table>");
    }

    #[test]
    fn refuses_codes_without_a_title() {
        assert!(ErrorSession::new(StatusCode::OK, "fine", None).is_none());
        assert!(ErrorSession::new(StatusCode::FOUND, "moved", None).is_none());
    }

    #[test]
    fn sets_html_content_type() {
        let mut session = ErrorSession::internal("oops", None);
        let mut headers = HeaderMap::new();
        assert_eq!(session.begin_response(&mut headers), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers[CONTENT_TYPE], "text/html;charset=utf-8");
    }

    #[tokio::test]
    async fn reject_includes_report_only_in_debug_mode() {
        let req = RequestContext::new("GET", "/secret").unwrap();
        let mut sink = crate::response::Response::new();

        let mut quiet = reject(false, &req, StatusCode::FORBIDDEN, "<no>").unwrap();
        let body = quiet.write_response(&mut sink).await.unwrap().unwrap();
        assert_eq!(&body[..], b"<h1>403 Forbidden</h1><p>&lt;no&gt;</p>");

        let mut loud = reject(true, &req, StatusCode::FORBIDDEN, "<no>").unwrap();
        let body = loud.write_response(&mut sink).await.unwrap().unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("/secret"));
        assert!(body.contains("<table"));
    }
}
