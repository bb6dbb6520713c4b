//! Synchronous handler bridge.
//!
//! Lets code written in the "I own the response and write to it" style take
//! part in the three-phase session protocol.
//!
//! # The rendezvous
//!
//! `enter` starts the push-style function on a blocking worker thread, then
//! waits. The worker and the session talk through three one-shot signals,
//! created fresh for every session:
//!
//! ```text
//!  dispatcher task                       blocking worker
//!  ───────────────                       ───────────────
//!  enter()  ── spawn ──────────────────▶ func(writer, req)
//!    waits on START                        write_status(201)  (recorded only)
//!                                          headers_mut().insert(..)
//!                    ◀──── START ───────   write(b"hello")    (first write)
//!  begin_response() → 201 + headers
//!  write_response()  ─── ALLOW ───────▶   (write unblocks)
//!    drains body chunks ◀───────────────   bytes
//!                    ◀──── END ─────────   func returns
//! ```
//!
//! Each signal fires at most once, in the order start, allow, end. Every
//! signal is a `tokio::sync::oneshot` channel, so a side that goes away
//! (a panicking worker, a dropped session) releases whoever waits on the
//! other end instead of leaving it blocked.
//!
//! # Failure containment
//!
//! The function runs under `catch_unwind`. A panic, or an `Err` returned by
//! the function, is captured and delivered on START if the worker had not
//! started responding yet (so `enter` fails), or on END otherwise (so
//! `write_response` fails). Either way the dispatcher degrades to a 500.
//!
//! # Liveness
//!
//! A function that never writes and never returns holds its session in
//! `enter` forever, unless `bridge_timeout_ms` is configured.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::binding::BindingContext;
use crate::error::{Error, Result, panic_message};
use crate::handler::Handler;
use crate::instance::{Instance, SessionEnv};
use crate::request::RequestContext;
use crate::response::ResponseSink;
use crate::session::{BoxFuture, BoxedSession, Entered, Session};

/// The response interface a push-style function writes to.
///
/// Body bytes go through [`io::Write`], so `write!` and `write_all` work.
/// Status and headers are sent together on the first body write, so headers
/// may still be set after `write_status`. Headers set after the first body
/// write are not sent.
pub trait ResponseWriter: io::Write {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Records the status. Only the first call counts, and only if no body
    /// bytes were written before it.
    fn write_status(&mut self, status: StatusCode);
}

/// A push-style response function.
pub type PushFn = Arc<dyn Fn(&mut dyn ResponseWriter, &RequestContext) -> io::Result<()> + Send + Sync>;

/// What the worker reports on START.
struct Started {
    status: StatusCode,
    headers: HeaderMap,
}

// ── Worker side ───────────────────────────────────────────────────────────────

/// The [`ResponseWriter`] a push-style function receives.
pub struct BridgeWriter {
    headers: HeaderMap,
    status: StatusCode,
    status_set: bool,
    start: Option<oneshot::Sender<Result<Started>>>,
    allow: Option<oneshot::Receiver<()>>,
    writable: bool,
    body: mpsc::UnboundedSender<Bytes>,
}

impl BridgeWriter {
    fn new(
        start: oneshot::Sender<Result<Started>>,
        allow: oneshot::Receiver<()>,
        body: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            headers: HeaderMap::new(),
            status: StatusCode::OK,
            status_set: false,
            start: Some(start),
            allow: Some(allow),
            writable: false,
            body,
        }
    }

    fn fire_start(&mut self) {
        if let Some(start) = self.start.take() {
            let headers = std::mem::take(&mut self.headers);
            // The session may already be gone; the first write will notice.
            let _ = start.send(Ok(Started { status: self.status, headers }));
        }
    }

    /// Blocks until the dispatcher grants the write.
    fn wait_allow(&mut self) -> io::Result<()> {
        if self.writable {
            return Ok(());
        }
        let granted = match self.allow.take() {
            Some(allow) => allow.blocking_recv().is_ok(),
            None => false,
        };
        if !granted {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response aborted before the body could be written",
            ));
        }
        self.writable = true;
        Ok(())
    }

    /// Delivers a captured failure to whichever side is still listening.
    fn fail(mut self, error: Error, end: oneshot::Sender<Result<()>>) {
        match self.start.take() {
            Some(start) => {
                let _ = start.send(Err(error));
                let _ = end.send(Err(Error::Aborted("worker failed before responding")));
            }
            None => {
                let _ = end.send(Err(error));
            }
        }
    }
}

impl ResponseWriter for BridgeWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        if self.start.is_none() || self.status_set {
            debug!(%status, "status already set, ignoring write_status");
            return;
        }
        self.status = status;
        self.status_set = true;
    }
}

impl io::Write for BridgeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.fire_start();
        self.wait_allow()?;
        if !data.is_empty() {
            self.body
                .send(Bytes::copy_from_slice(data))
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response sink closed"))?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Worker entry point. Runs on a blocking thread.
fn run_worker(func: PushFn, req: RequestContext, mut writer: BridgeWriter, end: oneshot::Sender<Result<()>>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(&mut writer, &req)));
    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(Error::Io(e)),
        Err(payload) => Some(Error::Panicked(panic_message(payload.as_ref()))),
    };
    match error {
        Some(error) => writer.fail(error, end),
        None => {
            // A function that never wrote still owes START; this empty write
            // fires it and then waits for ALLOW like any other write.
            if !writer.writable {
                let _ = io::Write::write(&mut writer, &[]);
            }
            drop(writer);
            let _ = end.send(Ok(()));
        }
    }
}

// ── Session side ──────────────────────────────────────────────────────────────

/// Channels the session keeps once the worker has started responding.
struct WorkerLink {
    status: StatusCode,
    headers: HeaderMap,
    allow: Option<oneshot::Sender<()>>,
    end: Option<oneshot::Receiver<Result<()>>>,
    body: mpsc::UnboundedReceiver<Bytes>,
}

/// Session that runs a push-style function through the rendezvous.
pub struct BridgeSession {
    func: PushFn,
    request: Option<RequestContext>,
    timeout: Option<Duration>,
    link: Option<WorkerLink>,
}

impl BridgeSession {
    pub fn new(func: PushFn, request: RequestContext, timeout: Option<Duration>) -> Self {
        Self { func, request: Some(request), timeout, link: None }
    }

    async fn start(&mut self) -> Result<Entered> {
        let req = self
            .request
            .take()
            .ok_or(Error::Protocol("bridge session entered twice"))?;

        let (start_tx, start_rx) = oneshot::channel();
        let (allow_tx, allow_rx) = oneshot::channel();
        let (end_tx, end_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();

        let writer = BridgeWriter::new(start_tx, allow_rx, body_tx);
        let func = Arc::clone(&self.func);
        // Detached: the worker ends on its own once END is sent.
        drop(tokio::task::spawn_blocking(move || run_worker(func, req, writer, end_tx)));

        let started = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, start_rx)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => start_rx.await,
        };
        // Dropping `allow_tx` on any early return below aborts the worker's writes.
        let Started { status, headers } =
            started.map_err(|_| Error::Aborted("worker exited without responding"))??;

        self.link = Some(WorkerLink {
            status,
            headers,
            allow: Some(allow_tx),
            end: Some(end_rx),
            body: body_rx,
        });
        Ok(Entered::Proceed)
    }

    async fn drain(&mut self, sink: &mut dyn ResponseSink) -> Result<Option<Bytes>> {
        let link = self
            .link
            .as_mut()
            .ok_or(Error::Protocol("bridge session has no running worker"))?;
        let end = link
            .end
            .take()
            .ok_or(Error::Protocol("bridge response written twice"))?;
        if let Some(allow) = link.allow.take() {
            let _ = allow.send(());
        }
        while let Some(chunk) = link.body.recv().await {
            sink.write_bytes(&chunk)?;
        }
        end.await
            .map_err(|_| Error::Aborted("worker exited without reporting"))??;
        Ok(None)
    }
}

impl Session for BridgeSession {
    fn enter(&mut self) -> BoxFuture<'_, Result<Entered>> {
        Box::pin(self.start())
    }

    fn begin_response(&mut self, headers: &mut HeaderMap) -> StatusCode {
        match self.link.as_mut() {
            Some(link) => {
                headers.extend(std::mem::take(&mut link.headers));
                link.status
            }
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn write_response<'a>(&'a mut self, sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>> {
        Box::pin(self.drain(sink))
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

/// Handler that serves every request with a push-style function.
///
/// ```rust
/// use std::io::Write;
/// use switchyard::SyncHandler;
/// use http::StatusCode;
///
/// let hello = SyncHandler::new(|w, req| {
///     w.headers_mut().insert("x-path", req.full_path_str().parse().unwrap());
///     w.write_status(StatusCode::CREATED);
///     write!(w, "hello")
/// });
/// # let _ = hello;
/// ```
pub struct SyncHandler {
    func: PushFn,
    timeout: Option<Duration>,
}

impl SyncHandler {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&mut dyn ResponseWriter, &RequestContext) -> io::Result<()> + Send + Sync + 'static,
    {
        Self { func: Arc::new(func), timeout: None }
    }
}

impl Handler for SyncHandler {
    fn init(&mut self, instance: &Arc<Instance>, _binding: Option<&BindingContext>) -> Result<()> {
        self.timeout = instance.config().bridge_timeout();
        Ok(())
    }

    fn begin_session(&self, req: &mut RequestContext, _env: Option<&SessionEnv>) -> Option<BoxedSession> {
        let session = BridgeSession::new(Arc::clone(&self.func), req.clone(), self.timeout);
        Some(Box::new(session))
    }
}
