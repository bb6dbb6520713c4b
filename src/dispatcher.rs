//! Per-request orchestration.
//!
//! The dispatcher owns the frozen route tree. For every request it asks the
//! tree for a session, follows internal redirects up to `max_redirect` hops,
//! then drives the chosen session through its response phases into a
//! buffered [`Response`].
//!
//! Nothing a handler does can take the dispatcher down: a missing session, a
//! failed `enter`, a protocol violation, an error while writing the body and
//! a panic anywhere in between all end as a logged 500 page.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::debug;

use crate::error::{Result, panic_message};
use crate::handler::{BoxedHandler, Handler};
use crate::instance::Instance;
use crate::log::{ERROR_LOG, Level, LogSink};
use crate::request::RequestContext;
use crate::response::{Response, ResponseSink};
use crate::session::{Entered, ErrorSession, SessionDriver};

const GENERIC_FAILURE: &str = "an error occured";
const REDIRECT_EXHAUSTED: &str = "over limited redirect";

/// Routes requests through an initialized handler tree.
///
/// ```rust
/// use std::sync::Arc;
/// use switchyard::{Dispatcher, Instance, InstanceConfig, NotModifiedSession, PathRouter, RequestContext, SessionFn};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> switchyard::Result<()> {
/// let app = PathRouter::new().route(
///     "/cached",
///     SessionFn::new(|_instance, _req, _env| Some(Box::new(NotModifiedSession))),
/// )?;
/// let instance = Arc::new(Instance::new(InstanceConfig::default()));
/// let dispatcher = Dispatcher::new(instance, app)?;
///
/// let response = dispatcher.dispatch(RequestContext::new("GET", "/cached")?).await;
/// assert_eq!(response.status(), 304);
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher {
    instance: Arc<Instance>,
    root: BoxedHandler,
    log: Arc<dyn LogSink>,
}

impl Dispatcher {
    /// Initializes `root` (and through it, the whole tree) exactly once.
    ///
    /// Fails when the instance has no `error` log sink or when any handler
    /// rejects its initialization.
    pub fn new(instance: Arc<Instance>, root: impl Handler) -> Result<Self> {
        let log = instance.log(ERROR_LOG)?;
        let mut root: BoxedHandler = Box::new(root);
        root.init(&instance, None)?;
        Ok(Self { instance, root, log })
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Produces the response for one request. Never fails.
    pub async fn dispatch(&self, mut req: RequestContext) -> Response {
        let mut driver = match AssertUnwindSafe(self.resolve(&mut req)).catch_unwind().await {
            Ok(driver) => driver,
            Err(payload) => {
                let reason = format!("panic: {}", panic_message(payload.as_ref()));
                self.report(&req, &reason);
                self.failure(&req, GENERIC_FAILURE)
            }
        };

        let reason = match AssertUnwindSafe(self.respond(&mut driver)).catch_unwind().await {
            Ok(Ok(out)) => return out,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
        };
        self.report(&req, &reason);

        // Whatever the failed session buffered is discarded with its response.
        let mut driver = self.failure(&req, GENERIC_FAILURE);
        match self.respond(&mut driver).await {
            Ok(out) => out,
            Err(_) => bare_internal_error(),
        }
    }

    /// Renders an error page outside of routing, e.g. for a rejected body.
    pub async fn error_response(&self, status: StatusCode, message: &str) -> Response {
        let Some(session) = ErrorSession::new(status, message, None) else {
            return bare_internal_error();
        };
        let mut driver = SessionDriver::entered(Box::new(session));
        self.respond(&mut driver).await.unwrap_or_else(|_| bare_internal_error())
    }

    /// Finds the terminal session, following at most `max_redirect` internal
    /// redirects.
    async fn resolve(&self, req: &mut RequestContext) -> SessionDriver {
        let max_redirect = self.instance.config().max_redirect;

        for _ in 0..=max_redirect {
            // Recomputed per hop: a redirect changes the path the environment sees.
            let env = self.instance.env_for(req);
            let Some(session) = self.root.begin_session(req, env.as_ref()) else {
                self.report(req, "except session");
                return self.failure(req, GENERIC_FAILURE);
            };
            let mut driver = SessionDriver::new(session);
            match driver.enter().await {
                Ok(Entered::Proceed) => return driver,
                Ok(Entered::Redirect(target)) => {
                    debug!(from = %req.full_path_str(), to = %target, "internal redirect");
                    req.redirect(&target);
                }
                Err(e) => {
                    self.report(req, &e.to_string());
                    return self.failure(req, GENERIC_FAILURE);
                }
            }
        }

        self.report(req, REDIRECT_EXHAUSTED);
        self.failure(req, REDIRECT_EXHAUSTED)
    }

    async fn respond(&self, driver: &mut SessionDriver) -> Result<Response> {
        let mut out = Response::new();
        let status = driver.begin_response(out.headers_mut())?;
        out.write_status(status);
        if let Some(body) = driver.write_response(&mut out).await? {
            out.write_bytes(&body)?;
        }
        driver.finish()?;
        Ok(out)
    }

    fn failure(&self, req: &RequestContext, message: &str) -> SessionDriver {
        let report = self.instance.is_debug().then(|| req.report());
        let session = ErrorSession::internal(message, report.as_deref());
        SessionDriver::entered(Box::new(session))
    }

    fn report(&self, req: &RequestContext, reason: &str) {
        let message = format!("{} {}: {reason}", req.method(), req.full_path_str());
        self.log.send(Level::Error, &message);
    }
}

fn bare_internal_error() -> Response {
    let mut out = Response::new();
    out.write_status(StatusCode::INTERNAL_SERVER_ERROR);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::HeaderMap;

    use super::*;
    use crate::config::InstanceConfig;
    use crate::error::Error;
    use crate::handler::SessionFn;
    use crate::instance::{Environment, SessionEnv};
    use crate::log::testing::MemorySink;
    use crate::router::PathRouter;
    use crate::session::{AliasSession, BoxFuture, BoxedSession, NotModifiedSession, Session, ready};

    fn setup(config: InstanceConfig, root: impl Handler) -> (Dispatcher, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let instance = Instance::new(config).with_log_sink(ERROR_LOG, sink.clone());
        (Dispatcher::new(Arc::new(instance), root).unwrap(), sink)
    }

    fn logged(sink: &MemorySink) -> Vec<String> {
        sink.messages.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    fn body_text(out: &Response) -> String {
        String::from_utf8_lossy(out.body()).into_owned()
    }

    struct Silent;

    impl Handler for Silent {
        fn begin_session(&self, _req: &mut RequestContext, _env: Option<&SessionEnv>) -> Option<BoxedSession> {
            None
        }
    }

    struct Exploding;

    impl Handler for Exploding {
        fn begin_session(&self, _req: &mut RequestContext, _env: Option<&SessionEnv>) -> Option<BoxedSession> {
            panic!("resolver blew up")
        }
    }

    /// Writes part of a body straight into the sink, then fails.
    struct HalfWritten;

    impl Session for HalfWritten {
        fn enter(&mut self) -> BoxFuture<'_, Result<Entered>> {
            ready(Ok(Entered::Proceed))
        }

        fn begin_response(&mut self, _headers: &mut HeaderMap) -> StatusCode {
            StatusCode::OK
        }

        fn write_response<'a>(&'a mut self, sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>> {
            Box::pin(async move {
                sink.write_bytes(b"half of a page")?;
                Err::<Option<Bytes>, _>(Error::Handler("storage went away".into()))
            })
        }
    }

    struct FailingEnter;

    impl Session for FailingEnter {
        fn enter(&mut self) -> BoxFuture<'_, Result<Entered>> {
            ready(Err(Error::Handler("no upstream".into())))
        }

        fn begin_response(&mut self, _headers: &mut HeaderMap) -> StatusCode {
            unreachable!("never entered")
        }

        fn write_response<'a>(&'a mut self, _sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>> {
            unreachable!("never entered")
        }
    }

    #[tokio::test]
    async fn dispatches_to_the_resolved_session() {
        let root = SessionFn::new(|_i, _r, _e| Some(Box::new(NotModifiedSession)));
        let (dispatcher, sink) = setup(InstanceConfig::default(), root);
        let out = dispatcher.dispatch(RequestContext::new("GET", "/").unwrap()).await;
        assert_eq!(out.status(), StatusCode::NOT_MODIFIED);
        assert!(logged(&sink).is_empty());
    }

    #[tokio::test]
    async fn missing_session_is_a_logged_500() {
        let (dispatcher, sink) = setup(InstanceConfig::default(), Silent);
        let out = dispatcher.dispatch(RequestContext::new("GET", "/x").unwrap()).await;
        assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(&out).contains(GENERIC_FAILURE));
        assert_eq!(logged(&sink), ["GET /x: except session"]);
    }

    #[tokio::test]
    async fn failed_enter_is_a_logged_500() {
        let root = SessionFn::new(|_i, _r, _e| Some(Box::new(FailingEnter)));
        let (dispatcher, sink) = setup(InstanceConfig::default(), root);
        let out = dispatcher.dispatch(RequestContext::new("GET", "/").unwrap()).await;
        assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(logged(&sink)[0].contains("no upstream"));
    }

    /// Records the path of every request it is asked about.
    #[derive(Default)]
    struct PathLog(Arc<Mutex<Vec<String>>>);

    impl Environment for PathLog {
        fn for_request(&self, req: &RequestContext) -> Option<SessionEnv> {
            self.0.lock().unwrap().push(req.full_path_str());
            None
        }
    }

    #[tokio::test]
    async fn environment_follows_internal_redirects() {
        let seen = PathLog::default();
        let paths = Arc::clone(&seen.0);
        let root = SessionFn::new(|_i, req, _e| {
            let session: BoxedSession = if req.full_path_str() == "/a" {
                Box::new(AliasSession::new("/b"))
            } else {
                Box::new(NotModifiedSession)
            };
            Some(session)
        });
        let instance = Instance::new(InstanceConfig::default()).with_environment(seen);
        let dispatcher = Dispatcher::new(Arc::new(instance), root).unwrap();

        let out = dispatcher.dispatch(RequestContext::new("GET", "/a").unwrap()).await;
        assert_eq!(out.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(*paths.lock().unwrap(), ["/a", "/b"]);
    }

    #[tokio::test]
    async fn panics_while_resolving_are_contained() {
        let (dispatcher, sink) = setup(InstanceConfig::default(), Exploding);
        let out = dispatcher.dispatch(RequestContext::new("POST", "/boom").unwrap()).await;
        assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(logged(&sink), ["POST /boom: panic: resolver blew up"]);
    }

    #[tokio::test]
    async fn write_phase_failure_replaces_the_partial_body() {
        let root = SessionFn::new(|_i, _r, _e| Some(Box::new(HalfWritten)));
        let (dispatcher, sink) = setup(InstanceConfig::default(), root);
        let out = dispatcher.dispatch(RequestContext::new("GET", "/").unwrap()).await;
        assert_eq!(out.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_text(&out).contains("half of a page"));
        assert!(logged(&sink)[0].contains("storage went away"));
    }

    #[tokio::test]
    async fn debug_mode_appends_the_request_report() {
        let config = InstanceConfig { debug: true, ..InstanceConfig::default() };
        let (dispatcher, _sink) = setup(config, Silent);
        let out = dispatcher.dispatch(RequestContext::new("GET", "/x?trace=1").unwrap()).await;
        assert!(body_text(&out).contains("trace"));

        let (quiet, _sink) = setup(InstanceConfig::default(), Silent);
        let out = quiet.dispatch(RequestContext::new("GET", "/x?trace=1").unwrap()).await;
        assert!(!body_text(&out).contains("trace"));
    }

    #[tokio::test]
    async fn error_response_renders_the_status_page() {
        let (dispatcher, _sink) = setup(InstanceConfig::default(), Silent);
        let out = dispatcher.error_response(StatusCode::PAYLOAD_TOO_LARGE, "body too large").await;
        assert_eq!(out.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body_text(&out).contains("body too large"));
    }

    #[test]
    fn requires_an_error_log() {
        let mut config = InstanceConfig::default();
        config.logs.clear();
        let instance = Arc::new(Instance::new(config));
        let result = Dispatcher::new(instance, PathRouter::new());
        assert!(matches!(result, Err(Error::MissingLogger(name)) if name == ERROR_LOG));
    }

    #[test]
    fn initializes_the_tree_once() {
        let instance = Arc::new(Instance::new(InstanceConfig::default()));
        let mut root = PathRouter::new();
        root.init(&instance, None).unwrap();
        assert!(matches!(Dispatcher::new(instance, root), Err(Error::Registration(_))));
    }
}
