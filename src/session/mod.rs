//! The three-phase session protocol.
//!
//! Once a handler has been selected, the dispatcher drives its session
//! through three phases, strictly in order:
//!
//! 1. [`enter`](Session::enter): do the work. May ask for an internal
//!    redirect, in which case the dispatcher re-resolves the request against
//!    the new path and discards this session.
//! 2. [`begin_response`](Session::begin_response): report the status and
//!    add response headers.
//! 3. [`write_response`](Session::write_response): produce the body, either
//!    as returned bytes or by writing directly to the sink.
//!
//! [`SessionDriver`] enforces the ordering and makes repeated phase calls
//! errors rather than duplicated output.

mod driver;
mod error;
mod redirect;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::error::Result;
use crate::response::ResponseSink;

pub use driver::{SessionDriver, SessionState};
pub use error::ErrorSession;
pub(crate) use error::reject;
pub use redirect::{AliasSession, NotModifiedSession, RedirectSession};

/// A heap-allocated, type-erased future borrowed for `'a`.
///
/// `Send` so a request's whole lifecycle can run on any tokio worker thread.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A heap-allocated, type-erased session.
pub type BoxedSession = Box<dyn Session>;

/// Outcome of a successful [`Session::enter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entered {
    /// Go on to the response phases.
    Proceed,
    /// Resolve again against this path, as a server-initiated redirect.
    Redirect(String),
}

/// The per-routing-attempt unit of application logic.
pub trait Session: Send {
    fn enter(&mut self) -> BoxFuture<'_, Result<Entered>>;

    /// Returns the status code and may add headers to `headers`.
    fn begin_response(&mut self, headers: &mut HeaderMap) -> StatusCode;

    /// Produces the body. Bytes written to `sink` go out first; returned
    /// bytes, if any, are appended after them.
    fn write_response<'a>(&'a mut self, sink: &'a mut dyn ResponseSink) -> BoxFuture<'a, Result<Option<Bytes>>>;
}

/// A future that is already complete.
pub(crate) fn ready<'a, T: Send + 'a>(value: T) -> BoxFuture<'a, T> {
    Box::pin(std::future::ready(value))
}
